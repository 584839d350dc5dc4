//! Tone compiler
//!
//! Turns threat rules and single alert tones into the flat segment list the
//! host beeper plays. Pure functions: no I/O, no state.

use serde::{Deserialize, Serialize};

use crate::settings::{AlertTone, ThreatBeep};

/// One playback segment
///
/// `frequency: None` is a pause; `Some(0)` is a zero-pitch tone, which the
/// host renders as a click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tone {
    pub frequency: Option<u32>,
    pub duration: u32,
}

impl Tone {
    pub const fn audible(frequency: u32, duration: u32) -> Self {
        Self {
            frequency: Some(frequency),
            duration,
        }
    }

    pub const fn silence(duration: u32) -> Self {
        Self {
            frequency: None,
            duration,
        }
    }

    pub fn is_silence(&self) -> bool {
        self.frequency.is_none()
    }
}

/// Ordered segments ready for dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToneSequence(Vec<Tone>);

impl ToneSequence {
    pub fn new(tones: Vec<Tone>) -> Self {
        Self(tones)
    }

    pub fn tones(&self) -> &[Tone] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of all segment durations, pauses included (ms)
    pub fn total_duration_ms(&self) -> u64 {
        self.0.iter().map(|t| u64::from(t.duration)).sum()
    }

    pub fn into_inner(self) -> Vec<Tone> {
        self.0
    }
}

impl From<Vec<Tone>> for ToneSequence {
    fn from(tones: Vec<Tone>) -> Self {
        Self(tones)
    }
}

/// Compile threat rules: each rule becomes its tone followed by its delay
///
/// Rule order is kept, nothing is merged, and zero-length segments are
/// emitted as-is.
pub fn compile_threat_rules(rules: &[ThreatBeep]) -> ToneSequence {
    rules
        .iter()
        .flat_map(|rule| {
            [
                Tone::audible(rule.frequency, rule.duration),
                Tone::silence(rule.delay),
            ]
        })
        .collect::<Vec<_>>()
        .into()
}

/// Compile a standalone tone (e.g. the all-clear tone); no trailing pause
pub fn compile_alert_tone(tone: &AlertTone) -> ToneSequence {
    ToneSequence(vec![Tone::audible(tone.frequency, tone.duration)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_ordering() {
        let rules = [ThreatBeep::new(200, 100, 300), ThreatBeep::new(400, 50, 0)];
        let seq = compile_threat_rules(&rules);
        assert_eq!(
            seq.tones(),
            &[
                Tone::audible(200, 100),
                Tone::silence(300),
                Tone::audible(400, 50),
                Tone::silence(0),
            ]
        );
    }

    #[test]
    fn test_compile_length_and_determinism() {
        for n in 0..=6 {
            let rules: Vec<_> = (0..n)
                .map(|i| ThreatBeep::new(100 * i, 10 * i, 300))
                .collect();
            let first = compile_threat_rules(&rules);
            let second = compile_threat_rules(&rules);
            assert_eq!(first, second);
            assert_eq!(first.len(), 2 * rules.len());
        }
    }

    #[test]
    fn test_identical_rules_not_merged() {
        let rules = [ThreatBeep::new(300, 80, 300); 3];
        let seq = compile_threat_rules(&rules);
        assert_eq!(seq.len(), 6);
        assert!(seq.tones().chunks(2).all(|pair| pair[0] == Tone::audible(300, 80)
            && pair[1] == Tone::silence(300)));
    }

    #[test]
    fn test_zero_duration_kept() {
        let seq = compile_threat_rules(&[ThreatBeep::new(500, 0, 0)]);
        assert_eq!(seq.tones(), &[Tone::audible(500, 0), Tone::silence(0)]);
    }

    #[test]
    fn test_all_clear_zero_tone() {
        let seq = compile_alert_tone(&AlertTone::new(0, 0));
        assert_eq!(seq.tones(), &[Tone::audible(0, 0)]);
        assert!(!seq.tones()[0].is_silence());
    }

    #[test]
    fn test_total_duration() {
        let seq = compile_threat_rules(&[ThreatBeep::new(200, 100, 300), ThreatBeep::new(400, 50, 0)]);
        assert_eq!(seq.total_duration_ms(), 450);
    }

    #[test]
    fn test_silence_serializes_as_null() {
        let json = serde_json::to_string(&ToneSequence::new(vec![
            Tone::audible(0, 5),
            Tone::silence(10),
        ]))
        .unwrap();
        assert_eq!(
            json,
            r#"[{"frequency":0,"duration":5},{"frequency":null,"duration":10}]"#
        );
    }
}
