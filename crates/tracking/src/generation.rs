use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Counter bumped whenever the tracked entity changes or the session closes.
/// Background work captures a [`GenerationToken`] when it starts and its
/// result is only applied while that token is still current.
#[derive(Debug, Clone, Default)]
pub struct Generation(Arc<AtomicU64>);

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Invalidates every outstanding token.
    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn token(&self) -> GenerationToken {
        GenerationToken {
            value: self.current(),
            source: self.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationToken {
    value: u64,
    source: Generation,
}

impl GenerationToken {
    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn is_current(&self) -> bool {
        self.source.current() == self.value
    }
}
