use model::GeoPoint;
use serde::Serialize;
use utility::geo;

/// Padding applied to each zero-length side of a bounding box, in degrees.
pub const DEFAULT_PADDING_DEG: f64 = 0.001;

const SIGNATURE_DECIMALS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl BoundingBox {
    /// Smallest box containing every valid point, `None` if there is none.
    pub fn around<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a GeoPoint>,
    {
        points
            .into_iter()
            .filter(|point| point.is_valid())
            .fold(None, |bounds: Option<Self>, point| {
                Some(match bounds {
                    None => Self {
                        south: point.lat,
                        west: point.lng,
                        north: point.lat,
                        east: point.lng,
                    },
                    Some(bounds) => Self {
                        south: bounds.south.min(point.lat),
                        west: bounds.west.min(point.lng),
                        north: bounds.north.max(point.lat),
                        east: bounds.east.max(point.lng),
                    },
                })
            })
    }

    pub fn is_degenerate(&self) -> bool {
        self.north <= self.south || self.east <= self.west
    }

    /// Widens every zero-length side by `padding` in both directions.
    pub fn padded(self, padding: f64) -> Self {
        let mut padded = self;
        if padded.north <= padded.south {
            padded.south = (padded.south - padding).max(-geo::MAX_LATITUDE);
            padded.north = (padded.north + padding).min(geo::MAX_LATITUDE);
        }
        if padded.east <= padded.west {
            padded.west = (padded.west - padding).max(-geo::MAX_LONGITUDE);
            padded.east = (padded.east + padding).min(geo::MAX_LONGITUDE);
        }
        padded
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            (self.south + self.north) / 2.0,
            (self.west + self.east) / 2.0,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Viewport {
    Center { point: GeoPoint },
    Bounds { bounds: BoundingBox },
}

impl Viewport {
    /// Fits `points`. A single valid point yields a center on it; several
    /// valid points yield their bounds, padded if they span no area (even
    /// when they all sit on the same position). `fallback` is used when there
    /// are no valid points at all.
    pub fn fit(points: &[GeoPoint], padding: f64, fallback: GeoPoint) -> Self {
        let valid = points.iter().filter(|point| point.is_valid()).count();
        match BoundingBox::around(points) {
            None => Self::Center { point: fallback },
            Some(bounds) if valid == 1 => Self::Center {
                point: bounds.center(),
            },
            Some(bounds) if bounds.is_degenerate() => Self::Bounds {
                bounds: bounds.padded(padding),
            },
            Some(bounds) => Self::Bounds { bounds },
        }
    }

    /// Stable key: equal for viewports that agree to six decimals.
    pub fn signature(&self) -> String {
        let fixed = |value: f64| geo::format_fixed(value, SIGNATURE_DECIMALS);
        match self {
            Self::Center { point } => format!("c:{},{}", fixed(point.lat), fixed(point.lng)),
            Self::Bounds { bounds } => format!(
                "b:{},{},{},{}",
                fixed(bounds.south),
                fixed(bounds.west),
                fixed(bounds.north),
                fixed(bounds.east)
            ),
        }
    }
}

/// Calls `on_fit` whenever the viewport of the rendered points changes, and
/// only then.
pub struct ViewportFitController<F> {
    on_fit: F,
    padding: f64,
    fallback: GeoPoint,
    last_signature: Option<String>,
}

impl<F> ViewportFitController<F>
where
    F: FnMut(&Viewport),
{
    pub fn new(on_fit: F) -> Self {
        Self {
            on_fit,
            padding: DEFAULT_PADDING_DEG,
            fallback: GeoPoint::new(0.0, 0.0),
            last_signature: None,
        }
    }

    pub fn with_padding(mut self, padding: f64) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_fallback_center(mut self, fallback: GeoPoint) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn last_signature(&self) -> Option<&str> {
        self.last_signature.as_deref()
    }

    /// Returns whether the callback fired.
    pub fn fit(&mut self, points: &[GeoPoint]) -> bool {
        let viewport = Viewport::fit(points, self.padding, self.fallback);
        let signature = viewport.signature();
        if self.last_signature.as_deref() == Some(signature.as_str()) {
            return false;
        }
        log::trace!("recentering to {}", signature);
        (self.on_fit)(&viewport);
        self.last_signature = Some(signature);
        true
    }

    /// Forgets the applied viewport; the next `fit` always fires.
    pub fn reset(&mut self) {
        self.last_signature = None;
    }
}
