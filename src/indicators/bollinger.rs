/// Bollinger Bands around an SMA
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl Bands {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Bollinger(period, std_devs) for every full window
///
/// Uses the population standard deviation of closes in the window.
pub fn bollinger_series(prices: &[f64], period: usize, std_devs: f64) -> Vec<Bands> {
    if period == 0 || prices.len() < period {
        return Vec::new();
    }

    prices
        .windows(period)
        .map(|window| {
            let middle = window.iter().sum::<f64>() / period as f64;
            let sd = std_dev(window, middle);
            Bands {
                upper: middle + std_devs * sd,
                middle,
                lower: middle - std_devs * sd,
            }
        })
        .collect()
}

pub fn calculate_bollinger(prices: &[f64], period: usize, std_devs: f64) -> Option<Bands> {
    if period == 0 || prices.len() < period {
        return None;
    }
    bollinger_series(&prices[prices.len() - period..], period, std_devs)
        .last()
        .copied()
}

pub(crate) fn std_dev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bands_collapse_on_flat_prices() {
        let prices = vec![50.0; 25];
        let bands = calculate_bollinger(&prices, 20, 2.0).unwrap();

        assert_eq!(bands.middle, 50.0);
        assert_eq!(bands.width(), 0.0);
    }

    #[test]
    fn test_bands_symmetric_around_mean() {
        let prices = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let bands = calculate_bollinger(&prices, 5, 2.0).unwrap();

        // mean 3, population sd sqrt(2)
        assert!((bands.middle - 3.0).abs() < 1e-12);
        assert!((bands.upper - (3.0 + 2.0 * 2f64.sqrt())).abs() < 1e-12);
        assert!((bands.middle - bands.lower - (bands.upper - bands.middle)).abs() < 1e-12);
    }

    #[test]
    fn test_bollinger_series_length() {
        let prices: Vec<f64> = (0..30).map(|i| i as f64).collect();
        assert_eq!(bollinger_series(&prices, 20, 2.0).len(), 11);
        assert!(calculate_bollinger(&prices[..10], 20, 2.0).is_none());
    }
}
