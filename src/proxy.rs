//! Proxy inputs and their folded scalar.

use serde::{Deserialize, Serialize};

use crate::error::ForecastError;

/// Ordered proxy readings, each in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct ProxyVector(Vec<f64>);

impl ProxyVector {
    pub fn new(values: Vec<f64>) -> Result<Self, ForecastError> {
        if values.is_empty() {
            return Err(ForecastError::InvalidInput(
                "proxy vector must not be empty".to_string(),
            ));
        }
        if let Some((i, v)) = values
            .iter()
            .enumerate()
            .find(|(_, v)| !(0.0..=1.0).contains(*v))
        {
            return Err(ForecastError::InvalidInput(format!(
                "proxy[{}] = {} outside [0, 1]",
                i, v
            )));
        }
        Ok(Self(values))
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    /// Arithmetic mean; always within `[0, 1]`.
    pub fn fold(&self) -> FoldedProxy {
        let mean = self.0.iter().sum::<f64>() / self.0.len() as f64;
        FoldedProxy(mean.clamp(0.0, 1.0))
    }
}

impl TryFrom<Vec<f64>> for ProxyVector {
    type Error = ForecastError;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        ProxyVector::new(values)
    }
}

impl From<ProxyVector> for Vec<f64> {
    fn from(p: ProxyVector) -> Self {
        p.0
    }
}

/// Oscillator forcing amplitude.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct FoldedProxy(f64);

impl FoldedProxy {
    pub fn new(value: f64) -> Result<Self, ForecastError> {
        if (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ForecastError::InvalidInput(format!(
                "folded proxy {} outside [0, 1]",
                value
            )))
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_is_mean() {
        let p = ProxyVector::new(vec![0.75, 0.70]).unwrap();
        assert!((p.fold().value() - 0.725).abs() < 1e-15);
    }

    #[test]
    fn test_rejects_out_of_range_and_empty() {
        assert!(ProxyVector::new(vec![]).is_err());
        assert!(ProxyVector::new(vec![0.5, 1.2]).is_err());
        assert!(ProxyVector::new(vec![-0.1]).is_err());
        assert!(ProxyVector::new(vec![f64::NAN]).is_err());
        assert!(FoldedProxy::new(1.5).is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: ProxyVector = serde_json::from_str("[0.1, 0.9]").unwrap();
        assert_eq!(ok.values(), &[0.1, 0.9]);
        assert!(serde_json::from_str::<ProxyVector>("[0.1, 3.0]").is_err());
    }
}
