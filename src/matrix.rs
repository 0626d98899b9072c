use prettytable::{format, Cell, Row, Table};
use std::fmt;

use crate::error::{SimResult, TbError};

/// Dense row-major matrix of unsigned elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<u64>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self { rows, cols, data: vec![0; rows * cols] }
    }

    pub fn from_fn(rows: usize, cols: usize, mut f: impl FnMut(usize, usize) -> u64) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for i in 0..rows {
            for j in 0..cols {
                data.push(f(i, j));
            }
        }
        Self { rows, cols, data }
    }

    /// Builds a matrix from equally long rows.
    pub fn from_rows(rows: Vec<Vec<u64>>) -> SimResult<Self> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        if let Some(bad) = rows.iter().find(|r| r.len() != cols) {
            return Err(TbError::RaggedMatrix { expected: cols, got: bad.len() });
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data: rows.into_iter().flatten().collect(),
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, i: usize, j: usize) -> u64 {
        self.data[i * self.cols + j]
    }

    pub fn set(&mut self, i: usize, j: usize, value: u64) {
        self.data[i * self.cols + j] = value;
    }

    pub fn row(&self, i: usize) -> &[u64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn column(&self, j: usize) -> Vec<u64> {
        (0..self.rows).map(|i| self.get(i, j)).collect()
    }

    pub fn transpose(&self) -> Self {
        Self::from_fn(self.cols, self.rows, |i, j| self.get(j, i))
    }

    /// Positions where `self` and `other` differ. Matrices of different shape
    /// differ everywhere.
    pub fn diff(&self, other: &Matrix) -> Vec<(usize, usize)> {
        if self.rows != other.rows || self.cols != other.cols {
            return (0..self.rows)
                .flat_map(|i| (0..self.cols).map(move |j| (i, j)))
                .collect();
        }
        (0..self.rows)
            .flat_map(|i| (0..self.cols).map(move |j| (i, j)))
            .filter(|&(i, j)| self.get(i, j) != other.get(i, j))
            .collect()
    }

    pub fn table(&self) -> Table {
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_NO_LINESEP_WITH_TITLE);
        let mut titles = vec![Cell::new("")];
        titles.extend((0..self.cols).map(|j| Cell::new(&j.to_string())));
        table.set_titles(Row::new(titles));
        for i in 0..self.rows {
            let mut cells = vec![Cell::new(&i.to_string())];
            cells.extend(self.row(i).iter().map(|v| Cell::new(&v.to_string())));
            table.add_row(Row::new(cells));
        }
        table
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transpose_swaps_indices() {
        let m = Matrix::from_fn(2, 3, |i, j| (10 * i + j) as u64);
        let t = m.transpose();
        assert_eq!((t.rows(), t.cols()), (3, 2));
        assert_eq!(t.get(2, 1), 12);
        assert_eq!(t.row(0), &[0, 10]);
        assert_eq!(m.column(1), vec![1, 11]);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        assert_eq!(
            Matrix::from_rows(vec![vec![1, 2], vec![3]]),
            Err(TbError::RaggedMatrix { expected: 2, got: 1 })
        );
        let m = Matrix::from_rows(vec![vec![1, 2], vec![3, 4]]).unwrap();
        assert_eq!(m.get(1, 0), 3);
    }

    #[test]
    fn diff_lists_mismatching_positions() {
        let a = Matrix::zeros(2, 2);
        let mut b = a.clone();
        b.set(1, 0, 5);
        assert_eq!(a.diff(&b), vec![(1, 0)]);
        assert_eq!(a.diff(&Matrix::zeros(1, 2)).len(), 4);
    }

    #[test]
    fn renders_every_element() {
        let m = Matrix::from_fn(2, 2, |i, j| (i * 2 + j) as u64 + 100);
        let out = m.to_string();
        for v in 100..104 {
            assert!(out.contains(&v.to_string()));
        }
    }
}
