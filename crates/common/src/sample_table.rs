use std::collections::HashMap;

use crate::{Sample, SampleValue};

/// Column store of captured values, keyed by short field name.
///
/// Columns only grow. Every column is expected to have one entry per sample;
/// `record` does not enforce that, so callers append whole samples through
/// [`SampleTable::append`] or call `record` exactly once per field per sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleTable {
    fields: Vec<String>,
    columns: HashMap<String, Vec<SampleValue>>,
}

impl SampleTable {
    pub fn new(fields: Vec<String>) -> Self {
        let columns = fields
            .iter()
            .map(|name| (name.clone(), Vec::new()))
            .collect();
        Self { fields, columns }
    }

    /// Appends to one column. Unknown names open a new trailing column.
    pub fn record(&mut self, short_name: &str, value: SampleValue) {
        match self.columns.get_mut(short_name) {
            Some(column) => column.push(value),
            None => {
                self.fields.push(short_name.to_string());
                self.columns.insert(short_name.to_string(), vec![value]);
            }
        }
    }

    pub fn append(&mut self, sample: &Sample) {
        for (name, value) in &sample.values {
            self.record(name, *value);
        }
    }

    pub fn field_names(&self) -> &[String] {
        &self.fields
    }

    pub fn column(&self, short_name: &str) -> Option<&[SampleValue]> {
        self.columns.get(short_name).map(Vec::as_slice)
    }

    /// Number of samples, taken from the first column.
    pub fn len(&self) -> usize {
        self.fields
            .first()
            .and_then(|name| self.columns.get(name))
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_aligned(&self) -> bool {
        let len = self.len();
        self.columns.values().all(|column| column.len() == len)
    }

    pub fn row(&self, index: usize) -> Option<Sample> {
        if index >= self.len() {
            return None;
        }
        let values = self
            .fields
            .iter()
            .map(|name| {
                let value = self
                    .columns
                    .get(name)
                    .and_then(|column| column.get(index))
                    .copied()
                    .unwrap_or(SampleValue::Unknown);
                (name.clone(), value)
            })
            .collect();
        Some(Sample { index, values })
    }

    pub fn rows(&self) -> impl Iterator<Item = Sample> + '_ {
        (0..self.len()).filter_map(move |index| self.row(index))
    }
}
