use crate::result::{ConduitError, Result};
use serde::de::{DeserializeOwned, Deserializer, Visitor};
use serde_json::{Map, Value};

/// One materialized result row: column names plus JSON cell values in
/// column order. Produced by the backends, consumed by [`from_row`].
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Row { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Case-insensitive lookup by column name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
            .and_then(|idx| self.values.get(idx))
    }

    pub(crate) fn segment(&self, start: usize, end: usize) -> Row {
        Row {
            columns: self.columns[start..end].to_vec(),
            values: self.values[start..end].to_vec(),
        }
    }

    fn first_cell(&self) -> Value {
        self.values.first().cloned().unwrap_or(Value::Null)
    }

    fn as_object(&self) -> Value {
        let mut map = Map::new();
        for (column, value) in self.columns.iter().zip(&self.values) {
            map.insert(column.clone(), value.clone());
        }
        Value::Object(map)
    }

    /// Object with keys corrected to the declared field names, matched
    /// case-insensitively against the column names.
    fn as_object_with_fields(&self, fields: &[&'static str]) -> Value {
        let mut map = Map::new();
        for (column, value) in self.columns.iter().zip(&self.values) {
            let key = fields
                .iter()
                .find(|field| field.eq_ignore_ascii_case(column))
                .map(|field| (*field).to_string())
                .unwrap_or_else(|| column.clone());
            map.insert(key, value.clone());
        }
        Value::Object(map)
    }
}

/// First cell of the first row, or null when the result is empty.
pub(crate) fn scalar_value(rows: Vec<Row>) -> Value {
    rows.into_iter()
        .next()
        .map(|row| row.first_cell())
        .unwrap_or(Value::Null)
}

/// Materialize a row into `T`. Non-struct targets bind from the first
/// column; structs bind by case-insensitive column-name-to-field-name
/// correspondence regardless of column order; tuples bind positionally.
pub fn from_row<T: DeserializeOwned>(row: &Row) -> Result<T> {
    T::deserialize(RowDeserializer { row }).map_err(ConduitError::Decode)
}

struct RowDeserializer<'a> {
    row: &'a Row,
}

impl<'de> Deserializer<'de> for RowDeserializer<'_> {
    type Error = serde_json::Error;

    fn deserialize_any<V>(self, visitor: V) -> std::result::Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        self.row.first_cell().deserialize_any(visitor)
    }

    fn deserialize_option<V>(self, visitor: V) -> std::result::Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        if self.row.first_cell().is_null() {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_newtype_struct<V>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> std::result::Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V>(self, visitor: V) -> std::result::Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        Value::Array(self.row.values.clone()).deserialize_seq(visitor)
    }

    fn deserialize_tuple<V>(
        self,
        len: usize,
        visitor: V,
    ) -> std::result::Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        Value::Array(self.row.values.clone()).deserialize_tuple(len, visitor)
    }

    fn deserialize_tuple_struct<V>(
        self,
        name: &'static str,
        len: usize,
        visitor: V,
    ) -> std::result::Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        Value::Array(self.row.values.clone()).deserialize_tuple_struct(name, len, visitor)
    }

    fn deserialize_map<V>(self, visitor: V) -> std::result::Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        self.row.as_object().deserialize_map(visitor)
    }

    fn deserialize_struct<V>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> std::result::Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        self.row.as_object_with_fields(fields).deserialize_map(visitor)
    }

    fn deserialize_enum<V>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> std::result::Result<V::Value, Self::Error>
    where
        V: Visitor<'de>,
    {
        self.row.first_cell().deserialize_enum(name, variants, visitor)
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct identifier ignored_any
    }
}
