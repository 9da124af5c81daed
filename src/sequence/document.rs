// Declarative step documents for modes and impulses
//
// Parsing is lenient at the step level: anything that is not a recognizable
// step or value becomes a no-op rather than failing the whole document.

use rand::Rng;
use serde::Deserialize;
use serde_json::Value;

use super::source::LoadError;

/// A number, a `{"random": [min, max]}` range, or nothing
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ValueSpec {
    #[default]
    Absent,
    Literal(f64),
    Random { min: f64, max: f64 },
    Unrecognized,
}

impl ValueSpec {
    pub fn from_json(value: Option<&Value>) -> Self {
        match value {
            None | Some(Value::Null) => ValueSpec::Absent,
            Some(Value::Number(n)) => n.as_f64().map_or(ValueSpec::Unrecognized, ValueSpec::Literal),
            Some(Value::Object(obj)) => match obj.get("random").and_then(Value::as_array) {
                Some(range) if range.len() >= 2 => ValueSpec::Random {
                    min: range[0].as_f64().unwrap_or(0.0),
                    max: range[1].as_f64().unwrap_or(0.0),
                },
                _ => ValueSpec::Unrecognized,
            },
            Some(_) => ValueSpec::Unrecognized,
        }
    }

    /// Like `from_json`, but also unwraps `{"<key>": value}`
    fn from_json_keyed(value: Option<&Value>, key: &str) -> Self {
        match value.and_then(|v| v.get(key)) {
            Some(inner) => ValueSpec::from_json(Some(inner)),
            None => ValueSpec::from_json(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Gaze {
        x: ValueSpec,
        y: ValueSpec,
        z: ValueSpec,
    },
    Lids {
        left: ValueSpec,
        right: ValueSpec,
    },
    /// Duration in ms
    Blink(ValueSpec),
    /// Delay in ms
    Wait(ValueSpec),
    Unrecognized,
}

/// Which primitive a step ran; used for logging and events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Gaze,
    Lids,
    Blink,
    Wait,
    Unrecognized,
}

impl Step {
    pub fn kind(&self) -> StepKind {
        match self {
            Step::Gaze { .. } => StepKind::Gaze,
            Step::Lids { .. } => StepKind::Lids,
            Step::Blink(_) => StepKind::Blink,
            Step::Wait(_) => StepKind::Wait,
            Step::Unrecognized => StepKind::Unrecognized,
        }
    }
}

impl From<Value> for Step {
    fn from(value: Value) -> Self {
        let Value::Object(step) = value else {
            return Step::Unrecognized;
        };
        // One primitive per step; earlier keys win
        if let Some(gaze) = step.get("gaze") {
            Step::Gaze {
                x: ValueSpec::from_json(gaze.get("x")),
                y: ValueSpec::from_json(gaze.get("y")),
                z: ValueSpec::from_json(gaze.get("z")),
            }
        } else if let Some(lids) = step.get("lids") {
            Step::Lids {
                left: ValueSpec::from_json(lids.get("left")),
                right: ValueSpec::from_json(lids.get("right")),
            }
        } else if step.contains_key("blink") {
            Step::Blink(ValueSpec::from_json_keyed(step.get("blink"), "duration"))
        } else if step.contains_key("wait") {
            Step::Wait(ValueSpec::from_json_keyed(step.get("wait"), "ms"))
        } else {
            Step::Unrecognized
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default, alias = "steps")]
    sequence: Option<Vec<Value>>,
    #[serde(default, rename = "loop")]
    looping: Option<bool>,
    #[serde(default)]
    coupling: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SequenceDocument {
    pub steps: Vec<Step>,
    pub looping: bool,
    pub coupling: f32,
}

impl SequenceDocument {
    pub fn parse(text: &str) -> Result<Self, LoadError> {
        let raw: RawDocument = serde_json::from_str(text)?;
        let steps: Vec<Step> = raw
            .sequence
            .ok_or(LoadError::MissingSteps)?
            .into_iter()
            .map(Step::from)
            .collect();
        if steps.is_empty() {
            return Err(LoadError::EmptySteps);
        }
        Ok(Self {
            steps,
            looping: raw.looping.unwrap_or(true),
            coupling: raw.coupling.unwrap_or(1.0),
        })
    }
}

/// Resolve a float field; absent or unrecognized keeps `current`
pub fn resolve_value<R: Rng + ?Sized>(spec: &ValueSpec, current: f32, rng: &mut R) -> f32 {
    match *spec {
        ValueSpec::Literal(v) => v as f32,
        ValueSpec::Random { min, max } => {
            // 1/10000 of the span resolution, both ends inclusive
            let fraction = rng.gen_range(0..=10_000u32) as f64 / 10_000.0;
            (min + fraction * (max - min)) as f32
        }
        ValueSpec::Absent | ValueSpec::Unrecognized => current,
    }
}

/// Resolve an integer field; fractional literals are truncated
pub fn resolve_int<R: Rng + ?Sized>(spec: &ValueSpec, default: i64, rng: &mut R) -> i64 {
    match *spec {
        ValueSpec::Literal(v) => v as i64,
        ValueSpec::Random { min, max } => {
            let (min, max) = (min as i64, max as i64);
            if max <= min {
                min
            } else {
                rng.gen_range(min..=max)
            }
        }
        ValueSpec::Absent | ValueSpec::Unrecognized => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};
    use serde_json::json;

    /// Fails the test if a literal ever reaches the RNG
    struct NoRng;

    impl RngCore for NoRng {
        fn next_u32(&mut self) -> u32 {
            panic!("rng used")
        }
        fn next_u64(&mut self) -> u64 {
            panic!("rng used")
        }
        fn fill_bytes(&mut self, _: &mut [u8]) {
            panic!("rng used")
        }
        fn try_fill_bytes(&mut self, _: &mut [u8]) -> Result<(), rand::Error> {
            panic!("rng used")
        }
    }

    #[test]
    fn test_parse_defaults_and_alias() {
        let doc = SequenceDocument::parse(r#"{"steps": [{"wait": 10}]}"#).unwrap();
        assert!(doc.looping);
        assert_eq!(doc.coupling, 1.0);
        assert_eq!(doc.steps, vec![Step::Wait(ValueSpec::Literal(10.0))]);

        let doc =
            SequenceDocument::parse(r#"{"sequence": [{"blink": 0}], "loop": false, "coupling": -0.5}"#)
                .unwrap();
        assert!(!doc.looping);
        assert_eq!(doc.coupling, -0.5);
    }

    #[test]
    fn test_parse_rejects_missing_or_empty() {
        assert!(matches!(
            SequenceDocument::parse(r#"{"loop": true}"#),
            Err(LoadError::MissingSteps)
        ));
        assert!(matches!(
            SequenceDocument::parse(r#"{"sequence": []}"#),
            Err(LoadError::EmptySteps)
        ));
        assert!(matches!(
            SequenceDocument::parse("not json"),
            Err(LoadError::Parse(_))
        ));
    }

    #[test]
    fn test_step_shapes() {
        let step = Step::from(json!({"gaze": {"x": 10, "y": {"random": [-5, 5]}}}));
        assert_eq!(step, Step::Gaze {
            x: ValueSpec::Literal(10.0),
            y: ValueSpec::Random { min: -5.0, max: 5.0 },
            z: ValueSpec::Absent,
        });

        assert_eq!(
            Step::from(json!({"blink": {"duration": 200}})),
            Step::Blink(ValueSpec::Literal(200.0))
        );
        assert_eq!(
            Step::from(json!({"blink": {"random": [100, 200]}})),
            Step::Blink(ValueSpec::Random { min: 100.0, max: 200.0 })
        );
        assert_eq!(Step::from(json!({"blink": {}})), Step::Blink(ValueSpec::Unrecognized));
        assert_eq!(
            Step::from(json!({"wait": {"ms": {"random": [1, 3]}}})),
            Step::Wait(ValueSpec::Random { min: 1.0, max: 3.0 })
        );
        // Non-object gaze: every axis keeps its value
        assert_eq!(Step::from(json!({"gaze": 5})), Step::Gaze {
            x: ValueSpec::Absent,
            y: ValueSpec::Absent,
            z: ValueSpec::Absent,
        });
        assert_eq!(Step::from(json!({"dance": 1})), Step::Unrecognized);
        assert_eq!(Step::from(json!(42)), Step::Unrecognized);
    }

    #[test]
    fn test_step_priority() {
        let step = Step::from(json!({"wait": 5, "lids": {"left": 1}, "blink": 100}));
        assert_eq!(step.kind(), StepKind::Lids);
    }

    #[test]
    fn test_literals_do_not_touch_rng() {
        let mut rng = NoRng;
        assert_eq!(resolve_value(&ValueSpec::Literal(12.5), 0.0, &mut rng), 12.5);
        assert_eq!(resolve_value(&ValueSpec::Absent, 7.0, &mut rng), 7.0);
        assert_eq!(resolve_value(&ValueSpec::Unrecognized, 7.0, &mut rng), 7.0);
        assert_eq!(resolve_int(&ValueSpec::Literal(99.9), 150, &mut rng), 99);
        assert_eq!(resolve_int(&ValueSpec::Absent, 150, &mut rng), 150);
        // Degenerate range needs no draw either
        assert_eq!(resolve_int(&ValueSpec::Random { min: 9.0, max: 3.0 }, 0, &mut rng), 9);
    }

    #[test]
    fn test_random_ranges_stay_in_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let float = ValueSpec::Random { min: -20.0, max: 30.0 };
        let int = ValueSpec::Random { min: 100.0, max: 110.0 };
        for _ in 0..500 {
            let v = resolve_value(&float, 0.0, &mut rng);
            assert!((-20.0..=30.0).contains(&v));
            let n = resolve_int(&int, 0, &mut rng);
            assert!((100..=110).contains(&n));
        }
    }
}
