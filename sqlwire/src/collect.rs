//! Row reduction strategies.
//!
//! A [`Collector`] is handed to every command that may produce rows. The
//! command seeds one accumulator per result set, feeds it every decoded row in
//! arrival order, and finishes it when the result set ends.
use std::marker::PhantomData;

use crate::row::{DecodeError, FromRow, Row};

/// Reduce the rows of a result set into a single value.
pub trait Collector {
    /// Intermediate accumulation state.
    type Acc;

    /// Final value of a result set.
    type Output;

    /// Create a fresh accumulator, called once per result set.
    fn seed(&mut self) -> Self::Acc;

    /// Feed one row.
    ///
    /// Returning an error fails the command, remaining rows are not
    /// accumulated.
    fn accumulate(&mut self, acc: &mut Self::Acc, row: Row) -> Result<(), DecodeError>;

    /// Transform the accumulator into the result value.
    fn finish(&mut self, acc: Self::Acc) -> Self::Output;
}

impl<C: Collector + ?Sized> Collector for &mut C {
    type Acc = C::Acc;
    type Output = C::Output;

    fn seed(&mut self) -> Self::Acc {
        C::seed(self)
    }

    fn accumulate(&mut self, acc: &mut Self::Acc, row: Row) -> Result<(), DecodeError> {
        C::accumulate(self, acc, row)
    }

    fn finish(&mut self, acc: Self::Acc) -> Self::Output {
        C::finish(self, acc)
    }
}

/// Keep every [`Row`] as is.
#[derive(Debug, Default, Clone, Copy)]
pub struct RowSet;

impl Collector for RowSet {
    type Acc = Vec<Row>;
    type Output = Vec<Row>;

    fn seed(&mut self) -> Self::Acc {
        Vec::new()
    }

    fn accumulate(&mut self, acc: &mut Self::Acc, row: Row) -> Result<(), DecodeError> {
        acc.push(row);
        Ok(())
    }

    fn finish(&mut self, acc: Self::Acc) -> Self::Output {
        acc
    }
}

/// Convert every row using its [`FromRow`] implementation.
pub struct Collect<R> {
    _p: PhantomData<fn() -> R>,
}

impl<R> Collect<R> {
    pub fn new() -> Self {
        Self { _p: PhantomData }
    }
}

impl<R> Default for Collect<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> std::fmt::Debug for Collect<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Collect")
    }
}

impl<R: FromRow> Collector for Collect<R> {
    type Acc = Vec<R>;
    type Output = Vec<R>;

    fn seed(&mut self) -> Self::Acc {
        Vec::new()
    }

    fn accumulate(&mut self, acc: &mut Self::Acc, row: Row) -> Result<(), DecodeError> {
        acc.push(R::from_row(row)?);
        Ok(())
    }

    fn finish(&mut self, acc: Self::Acc) -> Self::Output {
        acc
    }
}

/// Drop every row, only count them.
#[derive(Debug, Default, Clone, Copy)]
pub struct Count;

impl Collector for Count {
    type Acc = u64;
    type Output = u64;

    fn seed(&mut self) -> Self::Acc {
        0
    }

    fn accumulate(&mut self, acc: &mut Self::Acc, _: Row) -> Result<(), DecodeError> {
        *acc += 1;
        Ok(())
    }

    fn finish(&mut self, acc: Self::Acc) -> Self::Output {
        acc
    }
}

/// [`Collector`] built from closures, see [`fold`].
pub struct Fold<S, A, F> {
    seed: S,
    accumulate: A,
    finish: F,
}

/// Create a [`Collector`] from a seed, an accumulate and a finish function.
///
/// ```
/// use sqlwire::collect::{fold, Collector};
///
/// let mut names = fold(
///     String::new,
///     |acc: &mut String, row: sqlwire::Row| {
///         acc.push_str(&row.try_get::<_, String>(0)?);
///         Ok(())
///     },
///     |acc| acc.len(),
/// );
/// let seed = names.seed();
/// assert_eq!(names.finish(seed), 0);
/// ```
pub fn fold<Acc, Out, S, A, F>(seed: S, accumulate: A, finish: F) -> Fold<S, A, F>
where
    S: FnMut() -> Acc,
    A: FnMut(&mut Acc, Row) -> Result<(), DecodeError>,
    F: FnMut(Acc) -> Out,
{
    Fold { seed, accumulate, finish }
}

impl<Acc, Out, S, A, F> Collector for Fold<S, A, F>
where
    S: FnMut() -> Acc,
    A: FnMut(&mut Acc, Row) -> Result<(), DecodeError>,
    F: FnMut(Acc) -> Out,
{
    type Acc = Acc;
    type Output = Out;

    fn seed(&mut self) -> Self::Acc {
        (self.seed)()
    }

    fn accumulate(&mut self, acc: &mut Self::Acc, row: Row) -> Result<(), DecodeError> {
        (self.accumulate)(acc, row)
    }

    fn finish(&mut self, acc: Self::Acc) -> Self::Output {
        (self.finish)(acc)
    }
}

impl<S, A, F> std::fmt::Debug for Fold<S, A, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Fold")
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;

    use super::*;
    use crate::column::{ColumnDefinition, Format, RowDesc};

    fn rows() -> Vec<Row> {
        let desc = RowDesc::new(vec![ColumnDefinition::new(0, "n", 23, Format::Text)]);
        ["3", "4", "5"]
            .into_iter()
            .map(|n| Row::new(desc.clone(), vec![Some(Bytes::from_static(n.as_bytes()))]))
            .collect()
    }

    fn run<C: Collector>(mut collector: C) -> C::Output {
        let mut acc = collector.seed();
        for row in rows() {
            collector.accumulate(&mut acc, row).unwrap();
        }
        collector.finish(acc)
    }

    #[test]
    fn strategies() {
        assert_eq!(run(Count), 3);
        assert_eq!(run(RowSet).len(), 3);
        assert_eq!(run(Collect::<(i64,)>::new()), vec![(3,), (4,), (5,)]);

        let sum = fold(
            || 0i64,
            |acc: &mut i64, row: Row| {
                *acc += row.try_get::<_, i64>("n")?;
                Ok(())
            },
            |acc| acc * 2,
        );
        assert_eq!(run(sum), 24);
    }

    #[test]
    fn seed_per_result_set() {
        let mut seeds = 0;
        let mut collector = fold(
            || {
                seeds += 1;
                Vec::new()
            },
            |acc: &mut Vec<Row>, row| {
                acc.push(row);
                Ok(())
            },
            |acc| acc.len(),
        );
        let first = collector.seed();
        let second = collector.seed();
        assert_eq!(collector.finish(first) + collector.finish(second), 0);
        drop(collector);
        assert_eq!(seeds, 2);
    }
}
