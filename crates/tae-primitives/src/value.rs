use std::cmp::Ordering;

/// A single scalar value stored in a column.
///
/// This is the minimal realization of the engine's batch read/write
/// interface. It intentionally does not attempt a full type system —
/// SQL-level typing is handled by the layer above this engine.
#[derive(Debug, Clone, PartialEq, PartialOrd)]
pub enum Value {
    Null,
    I64(i64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// A total order over values, with `Null` sorting below everything else
    /// and mismatched variants compared by their discriminant. Used for
    /// zone-map `(min, max)` computation, which needs a total order even
    /// over a heterogeneous column.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        use Value::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (I64(a), I64(b)) => a.cmp(b),
            (Bool(a), Bool(b)) => a.cmp(b),
            (Str(a), Str(b)) => a.cmp(b),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            _ => self.discriminant().cmp(&other.discriminant()),
        }
    }

    fn discriminant(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::I64(_) => 1,
            Value::Bool(_) => 2,
            Value::Str(_) => 3,
            Value::Bytes(_) => 4,
        }
    }
}

/// One named column in a table schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub is_primary_key: bool,
    pub nullable: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>) -> Self {
        ColumnSchema {
            name: name.into(),
            is_primary_key: false,
            nullable: true,
        }
    }

    pub fn pk(mut self) -> Self {
        self.is_primary_key = true;
        self.nullable = false;
        self
    }
}

/// A table's logical schema: ordered columns, exactly one of which may be
/// marked primary key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    pub columns: Vec<ColumnSchema>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnSchema>) -> Self {
        Schema { columns }
    }

    pub fn pk_index(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.is_primary_key)
    }
}

/// A row is a single tuple of values, one per schema column.
pub type Row = Vec<Value>;

/// A columnar batch: one `Vec<Value>` per column, all the same length.
///
/// Rows are exchanged row-wise at the public `Append(ctx, tableID, batch)`
/// API but stored and scanned column-wise.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub columns: Vec<Vec<Value>>,
}

impl Batch {
    pub fn from_rows(num_cols: usize, rows: impl IntoIterator<Item = Row>) -> Self {
        let mut columns: Vec<Vec<Value>> = (0..num_cols).map(|_| Vec::new()).collect();
        for row in rows {
            debug_assert_eq!(row.len(), num_cols);
            for (i, v) in row.into_iter().enumerate() {
                columns[i].push(v);
            }
        }
        Batch { columns }
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, |c| c.len())
    }

    pub fn num_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn row(&self, idx: usize) -> Row {
        self.columns.iter().map(|c| c[idx].clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_round_trips_rows() {
        let rows = vec![
            vec![Value::I64(1), Value::I64(10)],
            vec![Value::I64(2), Value::I64(20)],
        ];
        let batch = Batch::from_rows(2, rows.clone());
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.row(0), rows[0]);
        assert_eq!(batch.row(1), rows[1]);
    }

    #[test]
    fn null_sorts_below_everything() {
        assert_eq!(Value::Null.total_cmp(&Value::I64(i64::MIN)), Ordering::Less);
    }
}
