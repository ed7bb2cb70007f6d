use crate::error::TemplateError;
use crate::value::{Object, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

/// 任何能转换为 Value 的类型
pub trait ToValue {
    fn to_value(&self) -> Value;
}

/// 任何能从 Value 还原的类型
pub trait FromValue: Sized {
    fn from_value(v: Value) -> Result<Self, TemplateError>;
}

// --- 基础类型的宏实现 ---
macro_rules! impl_to_value_primitive {
    ($rust_type:ty, $variant:ident) => {
        impl ToValue for $rust_type {
            fn to_value(&self) -> Value {
                Value::$variant(self.clone())
            }
        }
    };
}

macro_rules! impl_to_value_int {
    ($rust_type:ty, $variant:ident, $wide:ty) => {
        impl ToValue for $rust_type {
            fn to_value(&self) -> Value {
                Value::$variant(*self as $wide)
            }
        }
    };
}

macro_rules! impl_from_value_int {
    ($rust_type:ty) => {
        impl FromValue for $rust_type {
            fn from_value(v: Value) -> Result<Self, TemplateError> {
                match v {
                    Value::I64(n) => <$rust_type>::try_from(n).map_err(|_| {
                        TemplateError::TypeMismatch(format!(
                            "Value {} out of range for {}",
                            n,
                            stringify!($rust_type)
                        ))
                    }),
                    Value::U64(n) => <$rust_type>::try_from(n).map_err(|_| {
                        TemplateError::TypeMismatch(format!(
                            "Value {} out of range for {}",
                            n,
                            stringify!($rust_type)
                        ))
                    }),
                    _ => Err(TemplateError::TypeMismatch(format!(
                        "Expected integer value, got {}",
                        v.kind()
                    ))),
                }
            }
        }
    };
}

// bool 类型的特殊处理
impl_to_value_primitive!(bool, Bool);
impl FromValue for bool {
    fn from_value(v: Value) -> Result<Self, TemplateError> {
        match v {
            Value::Bool(b) => Ok(b),
            Value::I64(1) | Value::U64(1) => Ok(true),
            Value::I64(0) | Value::U64(0) => Ok(false),
            Value::Str(s) if s.eq_ignore_ascii_case("true") => Ok(true),
            Value::Str(s) if s.eq_ignore_ascii_case("false") => Ok(false),
            _ => Err(TemplateError::TypeMismatch(format!(
                "Expected bool, got {}",
                v.kind()
            ))),
        }
    }
}

impl ToValue for char {
    fn to_value(&self) -> Value {
        Value::Str(self.to_string())
    }
}

// string 类型的特殊处理
impl_to_value_primitive!(String, Str);
impl FromValue for String {
    fn from_value(v: Value) -> Result<Self, TemplateError> {
        match v {
            Value::Str(s) => Ok(s),
            Value::Undefined | Value::Null => Ok(String::new()),
            Value::List(_) | Value::Map(_) | Value::Object(_) => Err(TemplateError::TypeMismatch(
                format!("Expected string, got {}", v.kind()),
            )),
            other => Ok(other.to_string()),
        }
    }
}
impl ToValue for str {
    fn to_value(&self) -> Value {
        Value::Str(self.to_string())
    }
}

// 批量实现基础类型
impl_to_value_int!(i8, I64, i64);
impl_to_value_int!(i16, I64, i64);
impl_to_value_int!(i32, I64, i64);
impl_to_value_int!(i64, I64, i64);
impl_to_value_int!(isize, I64, i64);
impl_to_value_int!(u8, U64, u64);
impl_to_value_int!(u16, U64, u64);
impl_to_value_int!(u32, U64, u64);
impl_to_value_int!(u64, U64, u64);
impl_to_value_int!(usize, U64, u64);

impl_from_value_int!(i8);
impl_from_value_int!(i16);
impl_from_value_int!(i32);
impl_from_value_int!(i64);
impl_from_value_int!(isize);
impl_from_value_int!(u8);
impl_from_value_int!(u16);
impl_from_value_int!(u32);
impl_from_value_int!(u64);
impl_from_value_int!(usize);

// float 类型的特殊处理
impl ToValue for f32 {
    fn to_value(&self) -> Value {
        Value::F64(*self as f64)
    }
}
impl_to_value_primitive!(f64, F64);
impl FromValue for f64 {
    fn from_value(v: Value) -> Result<Self, TemplateError> {
        match v {
            Value::F64(n) => Ok(n),
            Value::I64(n) => Ok(n as f64),
            Value::U64(n) => Ok(n as f64),
            _ => Err(TemplateError::TypeMismatch(format!(
                "Expected float, got {}",
                v.kind()
            ))),
        }
    }
}

impl_to_value_primitive!(Decimal, Decimal);
impl_to_value_primitive!(NaiveDate, Date);
impl_to_value_primitive!(NaiveTime, Time);
impl_to_value_primitive!(NaiveDateTime, DateTime);
impl_to_value_primitive!(DateTime<Utc>, DateTimeUtc);

impl FromValue for Decimal {
    fn from_value(v: Value) -> Result<Self, TemplateError> {
        match v {
            Value::Decimal(d) => Ok(d),
            Value::I64(n) => Ok(Decimal::from(n)),
            Value::U64(n) => Ok(Decimal::from(n)),
            _ => Err(TemplateError::TypeMismatch(format!(
                "Expected decimal, got {}",
                v.kind()
            ))),
        }
    }
}

// Allow Value to be passed as argument
impl ToValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

// Allow Value to be returned as result
impl FromValue for Value {
    fn from_value(v: Value) -> Result<Self, TemplateError> {
        Ok(v)
    }
}

// Rendering without variables
impl ToValue for () {
    fn to_value(&self) -> Value {
        Value::Null
    }
}

// Blanket implementation for references
impl<T> ToValue for &T
where
    T: ToValue + ?Sized,
{
    fn to_value(&self) -> Value {
        (**self).to_value()
    }
}

impl<T: Object + 'static> ToValue for Arc<T> {
    fn to_value(&self) -> Value {
        Value::Object(self.clone())
    }
}

// Option
impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }
}
impl<T: FromValue> FromValue for Option<T> {
    fn from_value(v: Value) -> Result<Self, TemplateError> {
        match v {
            Value::Null | Value::Undefined => Ok(None),
            _ => Ok(Some(T::from_value(v)?)),
        }
    }
}

// Vec
impl<T: ToValue> ToValue for Vec<T> {
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(|v| v.to_value()).collect())
    }
}
impl<T: ToValue> ToValue for [T] {
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(|v| v.to_value()).collect())
    }
}
impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(v: Value) -> Result<Self, TemplateError> {
        match v {
            Value::List(l) => l.into_iter().map(T::from_value).collect(),
            _ => Err(TemplateError::TypeMismatch(format!(
                "Expected list, got {}",
                v.kind()
            ))),
        }
    }
}

// HashMap
impl<T: ToValue> ToValue for HashMap<String, T> {
    fn to_value(&self) -> Value {
        let mut map = HashMap::with_capacity(self.len());
        for (k, v) in self {
            map.insert(k.clone(), v.to_value());
        }
        Value::Map(map)
    }
}
impl<T: ToValue> ToValue for HashMap<&str, T> {
    fn to_value(&self) -> Value {
        Value::Map(
            self.iter()
                .map(|(k, v)| (k.to_string(), v.to_value()))
                .collect(),
        )
    }
}
impl<T: FromValue> FromValue for HashMap<String, T> {
    fn from_value(v: Value) -> Result<Self, TemplateError> {
        match v {
            Value::Map(m) => {
                let mut out = HashMap::with_capacity(m.len());
                for (k, val) in m {
                    out.insert(k, T::from_value(val)?);
                }
                Ok(out)
            }
            _ => Err(TemplateError::TypeMismatch(format!(
                "Expected map, got {}",
                v.kind()
            ))),
        }
    }
}
