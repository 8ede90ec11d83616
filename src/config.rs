use serde::{Deserialize, Serialize};

use crate::DescrIntError;

/// Smallest supported code depth in bits.
pub const MIN_DEPTH: usize = 4;
/// Largest supported code depth in bits.
pub const MAX_DEPTH: usize = 8;

/// How a distance matrix is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DistanceStrategy {
    /// Pick per call from the matrix shape and the cache sizes.
    #[default]
    Auto,
    /// Correlate packed codes directly.
    Direct,
    /// Widen codes to 16-bit lanes per macro tile, then correlate.
    Unpack,
}

impl DistanceStrategy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "auto" => Some(DistanceStrategy::Auto),
            "direct" => Some(DistanceStrategy::Direct),
            "unpack" => Some(DistanceStrategy::Unpack),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DistanceStrategy::Auto => "auto",
            DistanceStrategy::Direct => "direct",
            DistanceStrategy::Unpack => "unpack",
        }
    }
}

/// Cache capacities in bytes used to size macro tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSizes {
    pub l1: usize,
    pub l2: usize,
    pub l3: usize,
}

impl Default for CacheSizes {
    fn default() -> Self {
        Self {
            l1: 32 * 1024,
            l2: 256 * 1024,
            l3: 2 * 1024 * 1024,
        }
    }
}

impl CacheSizes {
    pub fn validate(&self) -> Result<(), DescrIntError> {
        if self.l1 == 0 || self.l2 == 0 || self.l3 == 0 {
            return Err(DescrIntError::InvalidCache("cache sizes must be non-zero"));
        }
        if self.l1 > self.l2 || self.l2 > self.l3 {
            return Err(DescrIntError::InvalidCache(
                "cache sizes must satisfy l1 <= l2 <= l3",
            ));
        }
        Ok(())
    }
}

/// Engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescrIntConfig {
    /// Components per descriptor, a positive multiple of 8.
    pub size: usize,
    /// Bits per component, 4 through 8.
    pub depth: usize,
    pub strategy: DistanceStrategy,
    pub cache: CacheSizes,
}

impl Default for DescrIntConfig {
    fn default() -> Self {
        Self {
            size: 512,
            depth: 8,
            strategy: DistanceStrategy::Auto,
            cache: CacheSizes::default(),
        }
    }
}

impl DescrIntConfig {
    pub fn new(size: usize, depth: usize) -> Self {
        Self {
            size,
            depth,
            ..Self::default()
        }
    }

    pub fn with_strategy(mut self, strategy: DistanceStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_cache(mut self, cache: CacheSizes) -> Self {
        self.cache = cache;
        self
    }

    /// Whether `(size, depth)` can be encoded.
    pub fn is_valid(size: usize, depth: usize) -> bool {
        size > 0 && size % 8 == 0 && (MIN_DEPTH..=MAX_DEPTH).contains(&depth)
    }

    pub fn validate(&self) -> Result<(), DescrIntError> {
        if !Self::is_valid(self.size, self.depth) {
            return Err(DescrIntError::InvalidConfig {
                size: self.size,
                depth: self.depth,
            });
        }
        self.cache.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity_boundaries() {
        assert!(DescrIntConfig::is_valid(8, 4));
        assert!(DescrIntConfig::is_valid(8, 8));
        assert!(!DescrIntConfig::is_valid(8, 3));
        assert!(!DescrIntConfig::is_valid(8, 9));
        assert!(!DescrIntConfig::is_valid(0, 6));
        assert!(!DescrIntConfig::is_valid(12, 6));
    }

    #[test]
    fn validate_reports_offending_shape() {
        let err = DescrIntConfig::new(12, 6).validate().unwrap_err();
        assert!(matches!(err, DescrIntError::InvalidConfig { size: 12, depth: 6 }));

        let cache = CacheSizes {
            l1: 1024,
            l2: 512,
            l3: 4096,
        };
        let err = DescrIntConfig::default().with_cache(cache).validate().unwrap_err();
        assert!(matches!(err, DescrIntError::InvalidCache(_)));
        assert!(DescrIntConfig::default().validate().is_ok());
    }

    #[test]
    fn strategy_names_round_trip() {
        for strategy in [
            DistanceStrategy::Auto,
            DistanceStrategy::Direct,
            DistanceStrategy::Unpack,
        ] {
            assert_eq!(DistanceStrategy::from_name(strategy.name()), Some(strategy));
        }
        assert_eq!(DistanceStrategy::from_name("Unpack"), Some(DistanceStrategy::Unpack));
        assert_eq!(DistanceStrategy::from_name("simd"), None);
    }
}
