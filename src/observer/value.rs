//! Observation Values
//!
//! Numeric types an observer can report, and their type-erased form.

use std::fmt;

use serde::Serialize;

/// Numeric kind of an observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Integer,
    Float,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Integer => write!(f, "integer"),
            ValueKind::Float => write!(f, "float"),
        }
    }
}

/// A value observed for one label set, with its numeric type erased
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Observation {
    Integer(i64),
    Float(f64),
}

impl Observation {
    pub fn kind(&self) -> ValueKind {
        match self {
            Observation::Integer(_) => ValueKind::Integer,
            Observation::Float(_) => ValueKind::Float,
        }
    }

    /// Lossy conversion for float-only sinks such as Prometheus gauges
    pub fn as_f64(&self) -> f64 {
        match *self {
            Observation::Integer(v) => v as f64,
            Observation::Float(v) => v,
        }
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Observation::Integer(v) => write!(f, "{}", v),
            Observation::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Numeric type an observer registry can be parametrized over.
pub trait ObservationValue: Copy + Send + Sync + fmt::Debug + 'static {
    /// The kind reported by observers of this type
    const KIND: ValueKind;

    fn into_observation(self) -> Observation;
}

impl ObservationValue for i64 {
    const KIND: ValueKind = ValueKind::Integer;

    fn into_observation(self) -> Observation {
        Observation::Integer(self)
    }
}

impl ObservationValue for f64 {
    const KIND: ValueKind = ValueKind::Float;

    fn into_observation(self) -> Observation {
        Observation::Float(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(<i64 as ObservationValue>::KIND, ValueKind::Integer);
        assert_eq!(<f64 as ObservationValue>::KIND, ValueKind::Float);
        assert_eq!(7i64.into_observation().kind(), ValueKind::Integer);
        assert_eq!(ValueKind::Float.to_string(), "float");
    }

    #[test]
    fn test_as_f64() {
        assert_eq!(Observation::Integer(-3).as_f64(), -3.0);
        assert_eq!(Observation::Float(2.5).as_f64(), 2.5);
    }

    #[test]
    fn test_serialize_untagged() {
        assert_eq!(serde_json::to_string(&Observation::Integer(5)).unwrap(), "5");
        assert_eq!(serde_json::to_string(&Observation::Float(0.5)).unwrap(), "0.5");
    }
}
