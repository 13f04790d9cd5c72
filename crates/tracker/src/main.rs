use std::{env, process::ExitCode, sync::Arc};

use dispatch_api::{
    channel::HttpPushChannel,
    client::{DispatchApiClient, DispatchApiCredentials},
    snapshot::HttpSnapshotSource,
};
use google_maps::{
    client::{GoogleMapsClient, GoogleMapsCredentials},
    directions::GoogleDirections,
    geocoding::GoogleGeocoder,
};
use model::TrackingId;
use tokio::{
    io::{self, AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tracking::{
    driver::{spawn_session, SessionHandle},
    session::{SessionConfig, SessionEvent, TrackingDeps},
};

const USAGE: &str = "usage: tracker <tracking-id>

Follows one delivery until Ctrl-C. Commands on stdin:
  open <tracking-id>   switch to another delivery
  refresh              reload the snapshot, resubscribe if needed
  view                 print the current view as JSON";

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::Subscription(state) => println!("subscription: {}", state),
        SessionEvent::Snapshot { last_updated } => match last_updated {
            Some(at) => println!("snapshot: updated {}", at.to_rfc3339()),
            None => println!("snapshot: loaded"),
        },
        SessionEvent::PathChanged(path) => println!(
            "path: {:?}{}, {} points, {:.2} km",
            path.source,
            if path.source.is_fallback() { " (fallback)" } else { "" },
            path.points.len(),
            path.length_km()
        ),
        SessionEvent::LivePoint { point, kinematics } => println!(
            "live: {:.6},{:.6} speed={:?} heading={:?}",
            point.lat, point.lng, kinematics.speed_kph, kinematics.heading_deg
        ),
        SessionEvent::LabelChanged(label) => println!("near: {}", label),
        SessionEvent::Recenter(viewport) => println!("viewport: {}", viewport.signature()),
    }
}

async fn command(handle: &SessionHandle, line: &str) {
    let mut words = line.split_whitespace();
    let result = match (words.next(), words.next()) {
        (Some("open"), Some(raw)) => match TrackingId::parse(raw) {
            Some(tracking_id) => handle.open(tracking_id).await,
            None => Ok(()),
        },
        (Some("refresh"), _) => handle.refresh().await,
        (Some("view"), _) => match handle.view().await {
            Ok(view) => {
                match serde_json::to_string_pretty(&view) {
                    Ok(json) => println!("{}", json),
                    Err(why) => log::error!("could not render view: {}", why),
                }
                Ok(())
            }
            Err(why) => Err(why),
        },
        (None, _) => Ok(()),
        _ => {
            println!("{}", USAGE);
            Ok(())
        }
    };
    if let Err(why) = result {
        log::warn!("{}: {}", line.trim(), why);
    }
}

fn deps(config: &SessionConfig) -> Result<TrackingDeps, String> {
    let dispatch = DispatchApiCredentials::from_env()
        .ok_or("expected DISPATCH_API_URL in env.")?;
    let dispatch = Arc::new(DispatchApiClient::new(&dispatch).map_err(|why| why.to_string())?);
    let google = GoogleMapsCredentials::from_env()
        .ok_or("expected GOOGLE_MAPS_API_KEY in env.")?;
    let google = Arc::new(GoogleMapsClient::new(&google).map_err(|why| why.to_string())?);

    Ok(TrackingDeps::new(
        Arc::new(HttpPushChannel::new(dispatch.clone())),
        Arc::new(HttpSnapshotSource::new(dispatch)),
        Arc::new(GoogleDirections::new(google.clone())),
        Arc::new(GoogleGeocoder::new(google)),
        config,
    ))
}

async fn follow(
    handle: SessionHandle,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) -> io::Result<()> {
    let mut lines = BufReader::new(io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            Some(event) = events.recv() => print_event(&event),
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => command(&handle, &line).await,
                None => stdin_open = false,
            },
        }
    }
    if let Err(why) = handle.close().await {
        log::warn!("closing failed: {}", why);
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::init();

    let tracking_id = match env::args().nth(1).as_deref().and_then(TrackingId::parse) {
        Some(tracking_id) => tracking_id,
        None => {
            eprintln!("{}", USAGE);
            return ExitCode::FAILURE;
        }
    };

    let config = SessionConfig::from_env();
    let deps = match deps(&config) {
        Ok(deps) => deps,
        Err(why) => {
            eprintln!("{}", why);
            return ExitCode::FAILURE;
        }
    };

    let (handle, events) = spawn_session(config, deps);
    if let Err(why) = handle.open(tracking_id.clone()).await {
        // the snapshot still loads; live updates wait for `refresh`
        log::warn!("no live updates for {}: {}", tracking_id, why);
    }

    match follow(handle, events).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(why) => {
            log::error!("reading stdin failed: {}", why);
            ExitCode::FAILURE
        }
    }
}
