use crate::detect::channel::{ChannelSnapshot, ChannelState};
use crate::detect::{AlertId, ChannelConfig, ChannelOutcome, DetectError, Reading};

/// All channel states of one asset, in configuration order.
///
/// Channels never see each other: each one consumes the same reading and
/// evolves its own counter and history.
#[derive(Debug, Clone)]
pub struct AssetState {
    channels: Vec<ChannelState>,
}

impl AssetState {
    pub fn new(channel_count: usize) -> Self {
        Self {
            channels: vec![ChannelState::new(); channel_count],
        }
    }

    pub fn channel(&self, index: usize) -> Option<&ChannelState> {
        self.channels.get(index)
    }

    /// Evaluate every channel. Results are indexed by channel position.
    pub fn evaluate(
        &mut self,
        configs: &[ChannelConfig],
        reading: &Reading,
    ) -> Vec<Result<ChannelOutcome, DetectError>> {
        configs
            .iter()
            .zip(self.channels.iter_mut())
            .map(|(cfg, state)| state.evaluate(cfg, reading))
            .collect()
    }

    pub fn attach_alert_id(
        &mut self,
        configs: &[ChannelConfig],
        index: usize,
        alert_id: AlertId,
    ) -> bool {
        match (configs.get(index), self.channels.get_mut(index)) {
            (Some(cfg), Some(state)) => state.attach_alert_id(cfg, alert_id),
            _ => false,
        }
    }

    pub fn snapshot(&self, configs: &[ChannelConfig]) -> Vec<ChannelSnapshot> {
        configs
            .iter()
            .zip(self.channels.iter())
            .map(|(cfg, state)| state.snapshot(cfg))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Condition, MissingPolicy, ThresholdPredicate};

    fn configs() -> Vec<ChannelConfig> {
        vec![
            ChannelConfig::new(
                "temperatura_alta",
                2,
                ThresholdPredicate::above("temperatura", 8.0),
            ),
            ChannelConfig::new(
                "choque",
                2,
                ThresholdPredicate::new(
                    vec![Condition::above("fuerza_g", 2.5), Condition::above("inclinacion", 30.0)],
                    "fuerza_g",
                    MissingPolicy::Error,
                ),
            ),
        ]
    }

    fn reading(temp: f64, g: f64, tilt: f64) -> Reading {
        Reading::new("X", "t")
            .with("temperatura", temp)
            .with("fuerza_g", g)
            .with("inclinacion", tilt)
    }

    #[test]
    fn test_channels_evolve_independently() {
        let cfgs = configs();
        let mut asset = AssetState::new(cfgs.len());

        asset.evaluate(&cfgs, &reading(9.0, 3.0, 45.0));
        let out = asset.evaluate(&cfgs, &reading(9.0, 0.5, 2.0));

        assert!(matches!(out[0], Ok(ChannelOutcome::Opened(_))));
        assert_eq!(out[1], Ok(ChannelOutcome::None));
        assert_eq!(asset.channel(0).unwrap().count(), 2);
        assert_eq!(asset.channel(1).unwrap().count(), 0);
    }

    #[test]
    fn test_fault_in_one_channel_spares_the_other() {
        let cfgs = configs();
        let mut asset = AssetState::new(cfgs.len());
        let partial = Reading::new("X", "t").with("temperatura", 9.0);

        let out = asset.evaluate(&cfgs, &partial);
        assert_eq!(out[0], Ok(ChannelOutcome::None));
        assert!(out[1].is_err());
        assert_eq!(asset.channel(0).unwrap().count(), 1);
    }

    #[test]
    fn test_attach_out_of_range_is_ignored() {
        let cfgs = configs();
        let mut asset = AssetState::new(cfgs.len());
        assert!(!asset.attach_alert_id(&cfgs, 5, 1));
    }
}
