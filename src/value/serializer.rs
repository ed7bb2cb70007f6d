use crate::Result;
use crate::error::TemplateError;
use crate::value::Value;
use serde::Serialize;
use serde::ser::{
    self, SerializeMap, SerializeSeq, SerializeStruct, SerializeStructVariant, SerializeTuple,
    SerializeTupleStruct, SerializeTupleVariant,
};
use std::collections::HashMap;

/// Converts any `Serialize` type into a [`Value`] usable as render variables.
///
/// Structs and maps become [`Value::Map`], sequences and tuples become
/// [`Value::List`]. Enum variants carrying data are wrapped in a one-entry map
/// keyed by the variant name, so `{{ shape.Circle.radius }}` reaches into
/// `Shape::Circle { radius }`; unit variants render as their name.
pub fn to_value<T: ?Sized + Serialize>(value: &T) -> Result<Value> {
    value.serialize(VariableSerializer)
}

struct VariableSerializer;

macro_rules! scalar {
    ($($method:ident($ty:ty) => $variant:ident as $target:ty),* $(,)?) => {
        $(
            fn $method(self, v: $ty) -> Result<Value> {
                Ok(Value::$variant(v as $target))
            }
        )*
    };
}

fn wide_int<T, N>(v: T, wrap: fn(N) -> Value) -> Result<Value>
where
    T: Copy + std::fmt::Display,
    N: TryFrom<T>,
{
    N::try_from(v)
        .map(wrap)
        .map_err(|_| TemplateError::Serialization(format!("integer {} does not fit in 64 bits", v)))
}

/// `variant: value` when serializing enum data, `value` otherwise.
fn tagged(variant: Option<&'static str>, value: Value) -> Value {
    match variant {
        Some(name) => Value::Map(HashMap::from([(name.to_string(), value)])),
        None => value,
    }
}

impl ser::Serializer for VariableSerializer {
    type Ok = Value;
    type Error = TemplateError;
    type SerializeSeq = ListBuilder;
    type SerializeTuple = ListBuilder;
    type SerializeTupleStruct = ListBuilder;
    type SerializeTupleVariant = ListBuilder;
    type SerializeMap = MapBuilder;
    type SerializeStruct = MapBuilder;
    type SerializeStructVariant = MapBuilder;

    scalar! {
        serialize_i8(i8) => I64 as i64,
        serialize_i16(i16) => I64 as i64,
        serialize_i32(i32) => I64 as i64,
        serialize_i64(i64) => I64 as i64,
        serialize_u8(u8) => U64 as u64,
        serialize_u16(u16) => U64 as u64,
        serialize_u32(u32) => U64 as u64,
        serialize_u64(u64) => U64 as u64,
        serialize_f32(f32) => F64 as f64,
        serialize_f64(f64) => F64 as f64,
    }

    fn serialize_i128(self, v: i128) -> Result<Value> {
        wide_int(v, Value::I64)
    }

    fn serialize_u128(self, v: u128) -> Result<Value> {
        wide_int(v, Value::U64)
    }

    fn serialize_bool(self, v: bool) -> Result<Value> {
        Ok(Value::Bool(v))
    }

    fn serialize_char(self, v: char) -> Result<Value> {
        Ok(Value::Str(v.into()))
    }

    fn serialize_str(self, v: &str) -> Result<Value> {
        Ok(Value::Str(v.to_owned()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Value> {
        Ok(Value::List(v.iter().map(|b| Value::U64(u64::from(*b))).collect()))
    }

    fn serialize_none(self) -> Result<Value> {
        Ok(Value::Null)
    }

    fn serialize_some<T: ?Sized + Serialize>(self, value: &T) -> Result<Value> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Value> {
        Ok(Value::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Value> {
        Ok(Value::Null)
    }

    fn serialize_unit_variant(self, _name: &'static str, _index: u32, variant: &'static str) -> Result<Value> {
        Ok(Value::Str(variant.to_owned()))
    }

    fn serialize_newtype_struct<T: ?Sized + Serialize>(self, _name: &'static str, value: &T) -> Result<Value> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: ?Sized + Serialize>(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Value> {
        Ok(tagged(Some(variant), value.serialize(self)?))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<ListBuilder> {
        Ok(ListBuilder::new(len.unwrap_or(0), None))
    }

    fn serialize_tuple(self, len: usize) -> Result<ListBuilder> {
        Ok(ListBuilder::new(len, None))
    }

    fn serialize_tuple_struct(self, _name: &'static str, len: usize) -> Result<ListBuilder> {
        Ok(ListBuilder::new(len, None))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<ListBuilder> {
        Ok(ListBuilder::new(len, Some(variant)))
    }

    fn serialize_map(self, len: Option<usize>) -> Result<MapBuilder> {
        Ok(MapBuilder::new(len.unwrap_or(0), None))
    }

    fn serialize_struct(self, _name: &'static str, len: usize) -> Result<MapBuilder> {
        Ok(MapBuilder::new(len, None))
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<MapBuilder> {
        Ok(MapBuilder::new(len, Some(variant)))
    }
}

struct ListBuilder {
    items: Vec<Value>,
    variant: Option<&'static str>,
}

impl ListBuilder {
    fn new(capacity: usize, variant: Option<&'static str>) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            variant,
        }
    }

    fn push<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        self.items.push(value.serialize(VariableSerializer)?);
        Ok(())
    }

    fn finish(self) -> Result<Value> {
        Ok(tagged(self.variant, Value::List(self.items)))
    }
}

impl SerializeSeq for ListBuilder {
    type Ok = Value;
    type Error = TemplateError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        self.push(value)
    }

    fn end(self) -> Result<Value> {
        self.finish()
    }
}

impl SerializeTuple for ListBuilder {
    type Ok = Value;
    type Error = TemplateError;

    fn serialize_element<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        self.push(value)
    }

    fn end(self) -> Result<Value> {
        self.finish()
    }
}

impl SerializeTupleStruct for ListBuilder {
    type Ok = Value;
    type Error = TemplateError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        self.push(value)
    }

    fn end(self) -> Result<Value> {
        self.finish()
    }
}

impl SerializeTupleVariant for ListBuilder {
    type Ok = Value;
    type Error = TemplateError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        self.push(value)
    }

    fn end(self) -> Result<Value> {
        self.finish()
    }
}

struct MapBuilder {
    entries: HashMap<String, Value>,
    pending_key: Option<String>,
    variant: Option<&'static str>,
}

impl MapBuilder {
    fn new(capacity: usize, variant: Option<&'static str>) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            pending_key: None,
            variant,
        }
    }

    fn insert<T: ?Sized + Serialize>(&mut self, key: String, value: &T) -> Result<()> {
        let value = value.serialize(VariableSerializer)?;
        self.entries.insert(key, value);
        Ok(())
    }

    fn finish(self) -> Result<Value> {
        Ok(tagged(self.variant, Value::Map(self.entries)))
    }
}

/// Template paths address map entries by text, so scalar keys are
/// stringified and anything else is rejected.
fn key_text(key: Value) -> Result<String> {
    match key {
        Value::Str(s) => Ok(s),
        Value::I64(_) | Value::U64(_) | Value::Bool(_) => Ok(key.to_string()),
        other => Err(TemplateError::Serialization(format!(
            "map key must be a string or number, got {}",
            other.kind()
        ))),
    }
}

impl SerializeMap for MapBuilder {
    type Ok = Value;
    type Error = TemplateError;

    fn serialize_key<T: ?Sized + Serialize>(&mut self, key: &T) -> Result<()> {
        self.pending_key = Some(key_text(key.serialize(VariableSerializer)?)?);
        Ok(())
    }

    fn serialize_value<T: ?Sized + Serialize>(&mut self, value: &T) -> Result<()> {
        let key = self
            .pending_key
            .take()
            .ok_or_else(|| TemplateError::Serialization("map value without a key".to_string()))?;
        self.insert(key, value)
    }

    fn end(self) -> Result<Value> {
        self.finish()
    }
}

impl SerializeStruct for MapBuilder {
    type Ok = Value;
    type Error = TemplateError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, key: &'static str, value: &T) -> Result<()> {
        self.insert(key.to_owned(), value)
    }

    fn end(self) -> Result<Value> {
        self.finish()
    }
}

impl SerializeStructVariant for MapBuilder {
    type Ok = Value;
    type Error = TemplateError;

    fn serialize_field<T: ?Sized + Serialize>(&mut self, key: &'static str, value: &T) -> Result<()> {
        self.insert(key.to_owned(), value)
    }

    fn end(self) -> Result<Value> {
        self.finish()
    }
}
