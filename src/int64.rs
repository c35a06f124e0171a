// Copyright 2024 The Vecbulk Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! 64-bit integer precision engine.
//!
//! The chunk files are JSON, whose only native numeric type is an IEEE-754
//! double: consumers that parse large integers into doubles lose digits
//! beyond ±2^53-1 even though the full signed 64-bit range is legal JSON
//! syntax. The engine normalizes every accepted input shape into a canonical
//! representation that renders its exact decimal digits, and the buffer
//! emits those digits as a bare literal (see [`crate::buffer`]).

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use snafu::ensure;

use crate::error::{self, Result};
use crate::value::{Value, WideInt};

/// Largest integer an IEEE-754 double represents exactly: 2^53 - 1.
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;
/// Smallest integer an IEEE-754 double represents exactly: -(2^53 - 1).
pub const MIN_SAFE_INTEGER: i64 = -MAX_SAFE_INTEGER;

/// Marker key used when embedding canonical 64-bit integers into JSON
/// documents; the buffer's post-pass rewrites markers into bare literals.
pub(crate) const INT64_MARKER_KEY: &str = "__int64__";

/// Build an int64 marker object for embedding in a JSON tree.
pub(crate) fn int64_marker(digits: String) -> serde_json::Value {
    let mut map = serde_json::Map::with_capacity(1);
    map.insert(INT64_MARKER_KEY.to_string(), serde_json::Value::String(digits));
    serde_json::Value::Object(map)
}

fn decimal_string_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?\d+$").unwrap())
}

/// Strategy governing how canonical 64-bit integers are represented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Int64Strategy {
    /// Widen every in-range value to its decimal digit string.
    #[default]
    Auto,
    /// Decimal digit string for any in-range value.
    String,
    /// Host number; inputs beyond the safe integer range are rejected.
    Number,
    /// Arbitrary-precision integer for any in-range value.
    BigInt,
}

impl FromStr for Int64Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "auto" => Ok(Int64Strategy::Auto),
            "string" => Ok(Int64Strategy::String),
            "number" => Ok(Int64Strategy::Number),
            "bigint" => Ok(Int64Strategy::BigInt),
            other => Err(format!("unknown int64 strategy: {other}")),
        }
    }
}

/// The explicit tagged union of accepted 64-bit integer input shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum Int64Input {
    /// Host integer
    Host(i64),
    /// Arbitrary-precision integer
    Big(i128),
    /// Wide integer supplied as low/high 32-bit words
    Wide(WideInt),
    /// Decimal digit string, optionally signed
    Decimal(String),
}

impl Int64Input {
    /// Classify a loose [`Value`] into an int64 input shape.
    ///
    /// Integral host floats are accepted only within the safe integer
    /// range; beyond it the caller's double has already lost digits.
    pub fn from_value(value: &Value) -> Option<Int64Input> {
        match value {
            Value::Int(i) => Some(Int64Input::Host(*i)),
            Value::BigInt(b) => Some(Int64Input::Big(*b)),
            Value::WideInt(w) => Some(Int64Input::Wide(*w)),
            Value::String(s) => Some(Int64Input::Decimal(s.clone())),
            Value::Float(f)
                if f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER as f64 =>
            {
                Some(Int64Input::Host(*f as i64))
            }
            _ => None,
        }
    }

    /// Resolve the exact `i64` value, enforcing the signed 64-bit range.
    fn to_exact(&self, field: &str) -> Result<i64> {
        match self {
            Int64Input::Host(i) => Ok(*i),
            Int64Input::Big(b) => i64::try_from(*b).map_err(|_| {
                error::Int64OutOfRangeSnafu {
                    field,
                    value: b.to_string(),
                }
                .build()
            }),
            Int64Input::Wide(w) => {
                let bits = w.bits();
                if w.unsigned {
                    i64::try_from(bits).map_err(|_| {
                        error::Int64OutOfRangeSnafu {
                            field,
                            value: bits.to_string(),
                        }
                        .build()
                    })
                } else {
                    Ok(bits as i64)
                }
            }
            Int64Input::Decimal(s) => {
                ensure!(
                    decimal_string_re().is_match(s),
                    error::Int64FormatSnafu {
                        field,
                        value: s.as_str(),
                    }
                );
                // Values too large for i128 are certainly outside i64.
                let wide = i128::from_str(s).map_err(|_| {
                    error::Int64OutOfRangeSnafu {
                        field,
                        value: s.as_str(),
                    }
                    .build()
                })?;
                i64::try_from(wide).map_err(|_| {
                    error::Int64OutOfRangeSnafu {
                        field,
                        value: s.as_str(),
                    }
                    .build()
                })
            }
        }
    }
}

/// Canonical representation of a validated 64-bit integer.
///
/// Every variant carries the exact value; they differ only in how the
/// caller asked the writer to model it. All of them are emitted as bare
/// decimal literals in the chunk files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Int64Repr {
    /// Decimal digit string (`auto` and `string` strategies)
    Text(String),
    /// Safe host number (`number` strategy)
    Number(i64),
    /// Arbitrary-precision integer (`bigint` strategy)
    Big(i64),
}

impl Int64Repr {
    /// Exact decimal digits of the value.
    pub fn digits(&self) -> String {
        match self {
            Int64Repr::Text(s) => s.clone(),
            Int64Repr::Number(v) | Int64Repr::Big(v) => v.to_string(),
        }
    }
}

impl fmt::Display for Int64Repr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Int64Repr::Text(s) => f.write_str(s),
            Int64Repr::Number(v) | Int64Repr::Big(v) => write!(f, "{v}"),
        }
    }
}

/// Strategy-selected 64-bit integer normalizer, one per writer instance.
#[derive(Debug, Clone, Copy)]
pub struct Int64Engine {
    strategy: Int64Strategy,
}

impl Int64Engine {
    pub fn new(strategy: Int64Strategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> Int64Strategy {
        self.strategy
    }

    /// Normalize a classified input into the canonical representation.
    pub fn normalize(&self, field: &str, input: Int64Input) -> Result<Int64Repr> {
        let exact = input.to_exact(field)?;

        match self.strategy {
            Int64Strategy::Auto | Int64Strategy::String => Ok(Int64Repr::Text(exact.to_string())),
            Int64Strategy::BigInt => Ok(Int64Repr::Big(exact)),
            Int64Strategy::Number => {
                ensure!(
                    (MIN_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&exact),
                    error::UnsafeInt64Snafu {
                        field,
                        value: exact.to_string(),
                    }
                );
                Ok(Int64Repr::Number(exact))
            }
        }
    }

    /// Classify and normalize a loose value in one step.
    pub fn normalize_value(&self, field: &str, value: &Value) -> Result<Int64Repr> {
        let input = Int64Input::from_value(value).ok_or_else(|| {
            error::InvalidFieldValueSnafu {
                field,
                expected: "integer, big integer, wide integer, or decimal string",
                actual: value.kind(),
            }
            .build()
        })?;
        self.normalize(field, input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    const ALL_STRATEGIES: [Int64Strategy; 4] = [
        Int64Strategy::Auto,
        Int64Strategy::String,
        Int64Strategy::Number,
        Int64Strategy::BigInt,
    ];

    fn inputs_for(v: i64) -> Vec<Int64Input> {
        vec![
            Int64Input::Host(v),
            Int64Input::Big(v as i128),
            Int64Input::Wide(WideInt::new(
                (v as u64 & 0xFFFF_FFFF) as u32,
                ((v as u64) >> 32) as u32,
                false,
            )),
            Int64Input::Decimal(v.to_string()),
        ]
    }

    #[test]
    fn test_round_trip_all_strategies_and_inputs() {
        for strategy in ALL_STRATEGIES {
            let engine = Int64Engine::new(strategy);
            for v in [0i64, 1, -1, 42, i64::MAX, i64::MIN, 1 << 40, -(1 << 40)] {
                if strategy == Int64Strategy::Number && v.unsigned_abs() > MAX_SAFE_INTEGER as u64 {
                    continue;
                }
                for input in inputs_for(v) {
                    let repr = engine
                        .normalize("f", input.clone())
                        .unwrap_or_else(|e| panic!("{strategy:?} {input:?}: {e}"));
                    assert_eq!(repr.digits(), v.to_string());
                }
            }
        }
    }

    #[test]
    fn test_out_of_range_rejected_by_every_strategy() {
        let too_big = [
            Int64Input::Big(i128::from(i64::MAX) + 1),
            Int64Input::Decimal("9223372036854775808".to_string()),
            Int64Input::Decimal("-9223372036854775809".to_string()),
            Int64Input::Wide(WideInt::new(0, 0x8000_0000, true)),
            Int64Input::Decimal("1".repeat(50)),
        ];
        for strategy in ALL_STRATEGIES {
            let engine = Int64Engine::new(strategy);
            for input in &too_big {
                assert!(
                    matches!(
                        engine.normalize("f", input.clone()),
                        Err(Error::Int64OutOfRange { .. })
                    ),
                    "{strategy:?} accepted {input:?}"
                );
            }
        }
    }

    #[test]
    fn test_number_strategy_rejects_unsafe() {
        let engine = Int64Engine::new(Int64Strategy::Number);
        let unsafe_value = MAX_SAFE_INTEGER + 1;
        assert!(matches!(
            engine.normalize("f", Int64Input::Host(unsafe_value)),
            Err(Error::UnsafeInt64 { .. })
        ));

        // Same value widens to a string under auto.
        let auto = Int64Engine::new(Int64Strategy::Auto);
        let repr = auto.normalize("f", Int64Input::Host(unsafe_value)).unwrap();
        assert_eq!(repr, Int64Repr::Text(unsafe_value.to_string()));
    }

    #[test]
    fn test_malformed_strings_rejected() {
        let engine = Int64Engine::new(Int64Strategy::Auto);
        for s in ["", "abc", "1.5", "+5", "0x10", "1_000", " 1"] {
            assert!(
                matches!(
                    engine.normalize("f", Int64Input::Decimal(s.to_string())),
                    Err(Error::Int64Format { .. })
                ),
                "accepted {s:?}"
            );
        }
    }

    #[test]
    fn test_decimal_string_normalized() {
        let engine = Int64Engine::new(Int64Strategy::String);
        let repr = engine
            .normalize("f", Int64Input::Decimal("007".to_string()))
            .unwrap();
        assert_eq!(repr.digits(), "7");
    }

    #[test]
    fn test_signed_wide_int() {
        let engine = Int64Engine::new(Int64Strategy::Auto);
        let minus_one = WideInt::new(0xFFFF_FFFF, 0xFFFF_FFFF, false);
        let repr = engine.normalize("f", Int64Input::Wide(minus_one)).unwrap();
        assert_eq!(repr.digits(), "-1");
    }

    #[test]
    fn test_float_input_classification() {
        assert_eq!(
            Int64Input::from_value(&Value::Float(5.0)),
            Some(Int64Input::Host(5))
        );
        // Fractional and beyond-safe doubles are not int64 inputs.
        assert_eq!(Int64Input::from_value(&Value::Float(5.5)), None);
        assert_eq!(Int64Input::from_value(&Value::Float(1e17)), None);
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("auto".parse(), Ok(Int64Strategy::Auto));
        assert_eq!("bigint".parse(), Ok(Int64Strategy::BigInt));
        assert!("decimal".parse::<Int64Strategy>().is_err());
    }
}
