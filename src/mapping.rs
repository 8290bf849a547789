//! Multi-shape and multi-set constructs: splitting joined rows into shape
//! segments and materializing typed tuples, one generic construct per concern
//! instead of an overload per arity.

use crate::{
    result::{ConduitError, Result},
    row::{Row, from_row},
};
use serde::de::DeserializeOwned;

/// Start offsets of each shape segment in a joined row. The first shape
/// starts at column zero; each later shape starts at its boundary column,
/// matched case-insensitively left to right. `split_on` holds either one
/// name reused for every boundary or one name per boundary.
pub(crate) fn split_points(columns: &[String], split_on: &[&str], arity: usize) -> Result<Vec<usize>> {
    if split_on.len() != 1 && split_on.len() != arity - 1 {
        return Err(ConduitError::new_type_mismatch(
            format!("1 or {} split columns", arity - 1),
            split_on.len().to_string(),
        ));
    }

    let mut starts = vec![0usize];
    let mut from = 1;
    for boundary in 0..arity - 1 {
        let name = if split_on.len() == 1 {
            split_on[0]
        } else {
            split_on[boundary]
        };
        let found = columns
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, column)| column.eq_ignore_ascii_case(name))
            .map(|(idx, _)| idx)
            .ok_or_else(|| ConduitError::SplitColumnNotFound(name.to_string()))?;
        starts.push(found);
        from = found + 1;
    }

    Ok(starts)
}

pub(crate) fn split_row(row: &Row, starts: &[usize]) -> Vec<Row> {
    let mut segments = Vec::with_capacity(starts.len());
    for (idx, &start) in starts.iter().enumerate() {
        let end = starts.get(idx + 1).copied().unwrap_or(row.len());
        segments.push(row.segment(start, end));
    }
    segments
}

/// Tuple of row shapes produced by one joined query. Implemented for tuples
/// of 2 through 10 deserializable shapes.
pub trait MultiRow: Sized {
    const ARITY: usize;

    fn from_segments(segments: &[Row]) -> Result<Self>;
}

macro_rules! impl_multi_row {
    ($arity:expr => $($shape:ident $idx:tt),+) => {
        impl<$($shape: DeserializeOwned),+> MultiRow for ($($shape,)+) {
            const ARITY: usize = $arity;

            fn from_segments(segments: &[Row]) -> Result<Self> {
                if segments.len() != $arity {
                    return Err(ConduitError::ResultSetCountMismatch {
                        expected: $arity,
                        got: segments.len(),
                    });
                }
                Ok(($(from_row::<$shape>(&segments[$idx])?,)+))
            }
        }
    };
}

impl_multi_row!(2 => A 0, B 1);
impl_multi_row!(3 => A 0, B 1, C 2);
impl_multi_row!(4 => A 0, B 1, C 2, D 3);
impl_multi_row!(5 => A 0, B 1, C 2, D 3, E 4);
impl_multi_row!(6 => A 0, B 1, C 2, D 3, E 4, F 5);
impl_multi_row!(7 => A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_multi_row!(8 => A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);
impl_multi_row!(9 => A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8);
impl_multi_row!(10 => A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9);

/// Split every joined row at the boundary columns and feed the shape tuple
/// through the caller's combiner. Boundaries are computed once from the
/// first row since all rows of one result set share a column layout.
pub(crate) fn combine_joined<S, R, F>(rows: Vec<Row>, split_on: &[&str], mut combine: F) -> Result<Vec<R>>
where
    S: MultiRow,
    F: FnMut(S) -> R,
{
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let starts = split_points(first.columns(), split_on, S::ARITY)?;

    let mut combined = Vec::with_capacity(rows.len());
    for row in &rows {
        let segments = split_row(row, &starts);
        combined.push(combine(S::from_segments(&segments)?));
    }
    Ok(combined)
}

/// Tuple of typed result sets produced by one multi-statement batch, one
/// `Vec` per statement. Implemented for tuples of 2 through 10 sets.
pub trait SetTuple: Sized {
    const ARITY: usize;

    fn from_sets(sets: Vec<Vec<Row>>) -> Result<Self>;
}

macro_rules! impl_set_tuple {
    ($arity:expr => $($set:ident $idx:tt),+) => {
        impl<$($set: DeserializeOwned),+> SetTuple for ($(Vec<$set>,)+) {
            const ARITY: usize = $arity;

            fn from_sets(mut sets: Vec<Vec<Row>>) -> Result<Self> {
                if sets.len() != $arity {
                    return Err(ConduitError::ResultSetCountMismatch {
                        expected: $arity,
                        got: sets.len(),
                    });
                }
                Ok(($(
                    std::mem::take(&mut sets[$idx])
                        .iter()
                        .map(from_row::<$set>)
                        .collect::<Result<Vec<_>>>()?,
                )+))
            }
        }
    };
}

impl_set_tuple!(2 => A 0, B 1);
impl_set_tuple!(3 => A 0, B 1, C 2);
impl_set_tuple!(4 => A 0, B 1, C 2, D 3);
impl_set_tuple!(5 => A 0, B 1, C 2, D 3, E 4);
impl_set_tuple!(6 => A 0, B 1, C 2, D 3, E 4, F 5);
impl_set_tuple!(7 => A 0, B 1, C 2, D 3, E 4, F 5, G 6);
impl_set_tuple!(8 => A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);
impl_set_tuple!(9 => A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8);
impl_set_tuple!(10 => A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7, I 8, J 9);
