//! # Strategies: value-shape descriptors
//!
//! A [`Strategy`] is a closed tree describing the shape of a value. Generating
//! from it issues draws against a [`DataSource`], so the produced [`Value`] is
//! fully determined by the recorded draws and can be rebuilt from them.
//!
//! ## Shrinking direction
//!
//! Every strategy is written so that smaller draws give simpler values:
//! integers move towards zero (or the bound nearest zero), booleans towards
//! `false`, lists towards fewer elements, and choices towards their first
//! alternative.
//!
//! ## Termination
//!
//! Recursion only follows the (finite) strategy tree, and every loop that
//! could run long (integer rejection, list growth) draws from the source on
//! each iteration, so the source's draw budget bounds generation.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::data::DataSource;
use crate::distributions::Repeat;
use crate::error::FailedDraw;
use crate::ints::{bounded_int, good_bitlengths, integer_from_bitlengths, integer_range, Sampler};

/// A generated test input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Integer(i64),
    Boolean(bool),
    List(Vec<Value>),
    Tuple(Vec<Value>),
}

impl Value {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Elements of a list or tuple.
    pub fn as_slice(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::List(items) | Value::Tuple(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }
}

fn write_items(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{}", i),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::List(items) => {
                write!(f, "[")?;
                write_items(f, items)?;
                write!(f, "]")
            }
            Value::Tuple(items) => {
                write!(f, "(")?;
                write_items(f, items)?;
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// A named predicate used by [`Strategy::Filter`].
#[derive(Clone)]
pub struct Predicate {
    pub name: String,
    test: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
}

impl Predicate {
    pub fn new<F>(name: &str, test: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Predicate {
            name: name.to_string(),
            test: Arc::new(test),
        }
    }

    pub fn accepts(&self, value: &Value) -> bool {
        (self.test)(value)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Predicate({})", self.name)
    }
}

/// A named value transformation used by [`Strategy::Map`].
#[derive(Clone)]
pub struct Transform {
    pub name: String,
    apply: Arc<dyn Fn(Value) -> Value + Send + Sync>,
}

impl Transform {
    pub fn new<F>(name: &str, apply: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        Transform {
            name: name.to_string(),
            apply: Arc::new(apply),
        }
    }

    pub fn apply(&self, value: Value) -> Value {
        (self.apply)(value)
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Transform({})", self.name)
    }
}

#[derive(Debug, Clone)]
pub enum Strategy {
    Integers {
        min: i64,
        max: i64,
    },
    AnyInteger,
    Booleans,
    Just(Value),
    Lists {
        elements: Box<Strategy>,
        min_size: u64,
        max_size: u64,
        average_size: f64,
    },
    Tuple(Vec<Strategy>),
    OneOf(Vec<Strategy>),
    Frequencies(Vec<(f32, Strategy)>),
    Filter {
        inner: Box<Strategy>,
        predicate: Predicate,
    },
    Map {
        inner: Box<Strategy>,
        transform: Transform,
    },
}

const DEFAULT_MAX_LIST_SIZE: u64 = 100;
const DEFAULT_AVERAGE_LIST_SIZE: f64 = 5.0;

fn bitlengths() -> &'static Sampler {
    static SAMPLER: OnceLock<Sampler> = OnceLock::new();
    SAMPLER.get_or_init(good_bitlengths)
}

pub fn integers(min: i64, max: i64) -> Strategy {
    Strategy::Integers { min, max }
}

pub fn any_integer() -> Strategy {
    Strategy::AnyInteger
}

pub fn booleans() -> Strategy {
    Strategy::Booleans
}

pub fn just(value: Value) -> Strategy {
    Strategy::Just(value)
}

pub fn lists(elements: Strategy) -> Strategy {
    Strategy::Lists {
        elements: Box::new(elements),
        min_size: 0,
        max_size: DEFAULT_MAX_LIST_SIZE,
        average_size: DEFAULT_AVERAGE_LIST_SIZE,
    }
}

pub fn tuples(parts: Vec<Strategy>) -> Strategy {
    Strategy::Tuple(parts)
}

pub fn one_of(options: Vec<Strategy>) -> Strategy {
    Strategy::OneOf(options)
}

pub fn frequencies(options: Vec<(f32, Strategy)>) -> Strategy {
    Strategy::Frequencies(options)
}

impl Strategy {
    /// Set the size bounds of a list strategy. Other strategies are returned
    /// unchanged.
    pub fn sized(self, min: u64, max: u64) -> Strategy {
        match self {
            Strategy::Lists {
                elements,
                average_size,
                ..
            } => Strategy::Lists {
                elements,
                min_size: min,
                max_size: max,
                average_size: average_size.max(min as f64).min(max as f64),
            },
            other => other,
        }
    }

    pub fn filter<F>(self, name: &str, predicate: F) -> Strategy
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Strategy::Filter {
            inner: Box::new(self),
            predicate: Predicate::new(name, predicate),
        }
    }

    pub fn map<F>(self, name: &str, transform: F) -> Strategy
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        Strategy::Map {
            inner: Box::new(self),
            transform: Transform::new(name, transform),
        }
    }

    /// Produce one value, drawing everything from `source`.
    ///
    /// `filter_attempts` bounds how often a filter re-draws its inner value
    /// before giving up on this test case.
    pub fn generate(&self, source: &mut DataSource, filter_attempts: u32) -> Result<Value, FailedDraw> {
        match self {
            Strategy::Integers { min, max } => Ok(Value::Integer(integer_range(source, *min, *max)?)),
            Strategy::AnyInteger => Ok(Value::Integer(integer_from_bitlengths(source, bitlengths())?)),
            Strategy::Booleans => Ok(Value::Boolean(source.bits(1)? == 1)),
            Strategy::Just(value) => Ok(value.clone()),
            Strategy::Lists {
                elements,
                min_size,
                max_size,
                average_size,
            } => {
                if min_size > max_size {
                    return Err(FailedDraw::InvalidArgument(format!(
                        "list min_size {} exceeds max_size {}",
                        min_size, max_size
                    )));
                }
                let mut repeat = Repeat::new(*min_size, *max_size, *average_size);
                let mut items = Vec::new();
                while repeat.should_continue(source)? {
                    items.push(elements.generate(source, filter_attempts)?);
                }
                Ok(Value::List(items))
            }
            Strategy::Tuple(parts) => {
                let items = parts
                    .iter()
                    .map(|part| part.generate(source, filter_attempts))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Tuple(items))
            }
            Strategy::OneOf(options) => {
                if options.is_empty() {
                    return Err(FailedDraw::InvalidArgument("one_of needs at least one strategy".to_string()));
                }
                let i = bounded_int(source, options.len() as u64 - 1)? as usize;
                options[i].generate(source, filter_attempts)
            }
            Strategy::Frequencies(options) => {
                let weights: Vec<f32> = options.iter().map(|(w, _)| *w).collect();
                let sampler = Sampler::new(&weights).ok_or_else(|| {
                    FailedDraw::InvalidArgument("frequencies needs a strategy with positive weight".to_string())
                })?;
                let i = sampler.sample(source)?;
                options[i].1.generate(source, filter_attempts)
            }
            Strategy::Filter { inner, predicate } => {
                for _ in 0..filter_attempts.max(1) {
                    let candidate = inner.generate(source, filter_attempts)?;
                    let satisfied = predicate.accepts(&candidate);
                    source.record_predicate(&predicate.name, satisfied);
                    if satisfied {
                        return Ok(candidate);
                    }
                }
                Err(FailedDraw::Rejected(format!("filter {} exhausted", predicate.name)))
            }
            Strategy::Map { inner, transform } => Ok(transform.apply(inner.generate(source, filter_attempts)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DrawRecord, DrawSequence};

    fn zeros() -> DataSource {
        DataSource::for_replay(&DrawSequence::new(vec![DrawRecord::new(64, 0); 64]), 0)
    }

    #[test]
    fn test_generation_is_deterministic() {
        let strategy = tuples(vec![
            lists(integers(-50, 50)),
            booleans(),
            one_of(vec![any_integer(), just(Value::Boolean(true))]),
        ]);
        for seed in 0..20 {
            let a = strategy.generate(&mut DataSource::new(seed), 3).unwrap();
            let b = strategy.generate(&mut DataSource::new(seed), 3).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_replaying_recorded_draws_rebuilds_value() {
        let strategy = lists(tuples(vec![integers(0, 1000), booleans()])).sized(1, 10);
        let mut source = DataSource::new(17);
        let original = strategy.generate(&mut source, 3).unwrap();
        let recorded = source.into_sequence();

        let mut replay = DataSource::for_replay(&recorded, 99);
        assert_eq!(strategy.generate(&mut replay, 3).unwrap(), original);
        assert_eq!(replay.into_sequence(), recorded);
    }

    #[test]
    fn test_zero_draws_give_simplest_values() {
        let strategy = tuples(vec![integers(5, 9), booleans(), lists(integers(0, 3)), one_of(vec![booleans(), any_integer()])]);
        let value = strategy.generate(&mut zeros(), 3).unwrap();
        assert_eq!(
            value,
            Value::Tuple(vec![Value::Integer(5), Value::Boolean(false), Value::List(vec![]), Value::Boolean(false)])
        );
    }

    #[test]
    fn test_list_sizes_are_bounded() {
        let strategy = lists(booleans()).sized(2, 4);
        for seed in 0..50 {
            let value = strategy.generate(&mut DataSource::new(seed), 3).unwrap();
            let len = value.as_slice().unwrap().len();
            assert!((2..=4).contains(&len));
        }
    }

    #[test]
    fn test_filter_gives_up_after_attempts() {
        let strategy = integers(0, 10).filter("never", |_| false);
        let result = strategy.generate(&mut DataSource::new(0), 3);
        assert_eq!(result, Err(FailedDraw::Rejected("filter never exhausted".to_string())));
    }

    #[test]
    fn test_filter_and_map() {
        let strategy = integers(0, 100)
            .filter("even", |v| v.as_integer().map_or(false, |i| i % 2 == 0))
            .map("halve", |v| Value::Integer(v.as_integer().unwrap_or(0) / 2));
        for seed in 0..30 {
            if let Ok(value) = strategy.generate(&mut DataSource::new(seed), 10) {
                assert!(value.as_integer().unwrap() <= 50);
            }
        }
    }

    #[test]
    fn test_invalid_strategies() {
        let mut source = DataSource::new(0);
        assert!(matches!(one_of(vec![]).generate(&mut source, 3), Err(FailedDraw::InvalidArgument(_))));
        assert!(matches!(
            frequencies(vec![(0.0, booleans())]).generate(&mut source, 3),
            Err(FailedDraw::InvalidArgument(_))
        ));
        assert!(matches!(
            lists(booleans()).sized(3, 1).generate(&mut source, 3),
            Err(FailedDraw::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_unbounded_lists_overrun() {
        let strategy = lists(booleans()).sized(0, u64::MAX);
        let forced = DrawSequence::new(vec![DrawRecord::new(64, u64::MAX); 64]);
        let mut source = DataSource::for_replay(&forced, 0).with_max_draws(64);
        assert_eq!(strategy.generate(&mut source, 3), Err(FailedDraw::Overrun { limit: 64 }));
    }

    #[test]
    fn test_display() {
        let value = Value::Tuple(vec![Value::List(vec![Value::Integer(1), Value::Integer(-2)]), Value::Boolean(true)]);
        assert_eq!(value.to_string(), "([1, -2], true)");
        assert_eq!(Value::Tuple(vec![Value::Integer(0)]).to_string(), "(0,)");
        assert_eq!(value.to_json(), serde_json::json!([[1, -2], true]));
    }
}
