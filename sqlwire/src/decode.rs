//! Result set assembly.
use bytes::Bytes;

use crate::{
    collect::Collector,
    column::RowDesc,
    row::{DecodeError, Row},
};

/// Status reported by the terminal packet of a result set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultMetadata {
    /// Number of rows affected, when the server reports it.
    pub affected_rows: Option<u64>,
    /// Last generated id, MySQL only.
    pub last_insert_id: Option<u64>,
    /// Another result set follows in the same command, MySQL only.
    pub more_results: bool,
}

/// One result set of a command.
#[derive(Debug)]
pub struct QueryResult<T> {
    pub value: T,
    /// Number of rows received.
    pub size: u64,
    /// Absent when the result set carried no column phase.
    pub desc: Option<RowDesc>,
    pub meta: ResultMetadata,
}

/// Every result set of one command, in arrival order.
#[derive(Debug)]
pub struct CommandResult<T> {
    pub results: Vec<QueryResult<T>>,
    /// The portal was suspended before all rows were sent.
    pub suspended: bool,
}

impl<T> CommandResult<T> {
    /// Returns the first result set.
    pub fn first(&self) -> Option<&QueryResult<T>> {
        self.results.first()
    }

    /// Returns the value of the last result set.
    pub fn into_value(self) -> Option<T> {
        self.results.into_iter().last().map(|e| e.value)
    }

    /// Sum of affected rows of every result set.
    pub fn affected_rows(&self) -> u64 {
        self.results.iter().filter_map(|e| e.meta.affected_rows).sum()
    }
}

/// Feed decoded rows of one result set into a [`Collector`].
pub struct RowResultDecoder<A> {
    desc: RowDesc,
    acc: A,
    size: u64,
}

impl<A> RowResultDecoder<A> {
    pub fn new<C: Collector<Acc = A>>(desc: RowDesc, collector: &mut C) -> Self {
        Self { desc, acc: collector.seed(), size: 0 }
    }

    pub fn desc(&self) -> &RowDesc {
        &self.desc
    }

    /// Rows decoded so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Wrap `values` with the active description and accumulate it.
    pub fn decode_row<C: Collector<Acc = A>>(
        &mut self,
        collector: &mut C,
        values: Vec<Option<Bytes>>,
    ) -> Result<(), DecodeError> {
        self.size += 1;
        let row = Row::new(self.desc.clone(), values);
        collector.accumulate(&mut self.acc, row)
    }

    /// Count a row without decoding it.
    pub(crate) fn skip_row(&mut self) {
        self.size += 1;
    }

    pub fn complete<C: Collector<Acc = A>>(self, collector: &mut C, meta: ResultMetadata) -> QueryResult<C::Output> {
        QueryResult {
            value: collector.finish(self.acc),
            size: self.size,
            desc: Some(self.desc),
            meta,
        }
    }
}

/// Result of a result set without column phase.
pub fn empty<C: Collector>(collector: &mut C, meta: ResultMetadata) -> QueryResult<C::Output> {
    let seed = collector.seed();
    QueryResult {
        value: collector.finish(seed),
        size: 0,
        desc: None,
        meta,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        collect::{Collect, Count, RowSet},
        column::{ColumnDefinition, Format},
    };

    fn desc() -> RowDesc {
        RowDesc::new(vec![
            ColumnDefinition::new(0, "id", 23, Format::Text),
            ColumnDefinition::new(1, "name", 25, Format::Text),
        ])
    }

    fn values(id: &'static str, name: Option<&'static str>) -> Vec<Option<Bytes>> {
        vec![Some(Bytes::from_static(id.as_bytes())), name.map(|e| Bytes::from_static(e.as_bytes()))]
    }

    #[test]
    fn rows_in_order() {
        let mut collector = Collect::<(i32, Option<String>)>::new();
        let mut decoder = RowResultDecoder::new(desc(), &mut collector);
        decoder.decode_row(&mut collector, values("1", Some("a"))).unwrap();
        decoder.decode_row(&mut collector, values("2", None)).unwrap();
        decoder.decode_row(&mut collector, values("3", Some("c"))).unwrap();

        let result = decoder.complete(&mut collector, ResultMetadata::default());
        assert_eq!(result.size, 3);
        assert_eq!(result.value, vec![(1, Some("a".into())), (2, None), (3, Some("c".into()))]);
        assert_eq!(result.desc.unwrap().len(), 2);
    }

    #[test]
    fn zero_rows() {
        let decoder = RowResultDecoder::new(desc(), &mut RowSet);
        assert_eq!(decoder.size(), 0);
        let result = decoder.complete(&mut RowSet, ResultMetadata::default());
        assert!(result.value.is_empty());
        assert!(result.desc.is_some());

        let meta = ResultMetadata { affected_rows: Some(4), ..Default::default() };
        let result = empty(&mut Count, meta);
        assert_eq!(result.value, 0);
        assert_eq!(result.size, 0);
        assert!(result.desc.is_none());
        assert_eq!(result.meta.affected_rows, Some(4));
    }

    #[test]
    fn decode_failure() {
        let mut collector = Collect::<(i32, String)>::new();
        let mut decoder = RowResultDecoder::new(desc(), &mut collector);
        let err = decoder.decode_row(&mut collector, values("x", Some("a"))).unwrap_err();
        assert!(matches!(err, DecodeError::Parse(_)));
    }
}
