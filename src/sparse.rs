use core::fmt;
use core::ops::Range;

use faer::sparse::{CreationError, SparseColMat, Triplet};

use crate::mesh::ShapeError;

/// Compressed sparse row (CSR) matrix over `f64`.
///
/// This is the single canonical representation: column indices are zero-based,
/// sorted and free of duplicates within each row. Coordinate (COO) form is only
/// an assembly format, see [`CooMatrix`] and [`SparseMatrix::to_coo`].
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrix {
    nrows: usize,
    ncols: usize,
    row_ptrs: Vec<usize>,
    col_indices: Vec<usize>,
    values: Vec<f64>,
}

/// Validation errors for raw CSR arrays.
#[derive(Debug, Clone)]
pub enum PatternError {
    /// row_ptrs length is not nrows + 1.
    RowPtrLen { expected: usize, actual: usize },
    /// row_ptrs[0] is not 0.
    RowPtrStart { value: usize },
    /// row_ptrs is not non-decreasing.
    RowPtrNotMonotonic { row: usize, prev: usize, next: usize },
    /// row_ptrs[nrows] does not match col_indices length.
    RowPtrOutOfBounds { last: usize, col_indices_len: usize },
    /// values and col_indices lengths differ.
    ValuesLen { expected: usize, actual: usize },
    /// A column index is >= ncols.
    ColIndexOutOfBounds { row: usize, col: usize, ncols: usize },
    /// Column indices in a row are not strictly increasing.
    ColIndexNotSorted { row: usize, prev: usize, next: usize },
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RowPtrLen { expected, actual } => {
                write!(f, "row_ptrs length {actual} does not match expected {expected}")
            }
            Self::RowPtrStart { value } => {
                write!(f, "row_ptrs must start at 0 (got {value})")
            }
            Self::RowPtrNotMonotonic { row, prev, next } => {
                write!(f, "row_ptrs not monotonic at row {row}: {prev} > {next}")
            }
            Self::RowPtrOutOfBounds {
                last,
                col_indices_len,
            } => {
                write!(
                    f,
                    "row_ptrs end {last} does not match col_indices length {col_indices_len}"
                )
            }
            Self::ValuesLen { expected, actual } => {
                write!(f, "values length {actual} does not match expected {expected}")
            }
            Self::ColIndexOutOfBounds { row, col, ncols } => {
                write!(f, "column index {col} in row {row} exceeds ncols {ncols}")
            }
            Self::ColIndexNotSorted { row, prev, next } => {
                write!(f, "column indices not sorted in row {row}: {prev} >= {next}")
            }
        }
    }
}

impl std::error::Error for PatternError {}

impl SparseMatrix {
    /// Creates a validated CSR matrix from raw arrays.
    ///
    /// Requirements:
    /// - `row_ptrs.len() == nrows + 1`
    /// - `row_ptrs` is non-decreasing and starts at `0`
    /// - `row_ptrs[nrows] == col_indices.len() == values.len()`
    /// - column indices are strictly increasing and `< ncols` within each row
    pub fn new(
        nrows: usize,
        ncols: usize,
        row_ptrs: Vec<usize>,
        col_indices: Vec<usize>,
        values: Vec<f64>,
    ) -> Result<Self, PatternError> {
        let expected = nrows + 1;
        if row_ptrs.len() != expected {
            return Err(PatternError::RowPtrLen {
                expected,
                actual: row_ptrs.len(),
            });
        }
        if row_ptrs[0] != 0 {
            return Err(PatternError::RowPtrStart { value: row_ptrs[0] });
        }
        for row in 0..nrows {
            let prev = row_ptrs[row];
            let next = row_ptrs[row + 1];
            if prev > next {
                return Err(PatternError::RowPtrNotMonotonic { row, prev, next });
            }
        }
        let last = row_ptrs[nrows];
        if last != col_indices.len() {
            return Err(PatternError::RowPtrOutOfBounds {
                last,
                col_indices_len: col_indices.len(),
            });
        }
        if values.len() != col_indices.len() {
            return Err(PatternError::ValuesLen {
                expected: col_indices.len(),
                actual: values.len(),
            });
        }

        for row in 0..nrows {
            let cols = &col_indices[row_ptrs[row]..row_ptrs[row + 1]];
            let mut prev: Option<usize> = None;
            for &col in cols {
                if col >= ncols {
                    return Err(PatternError::ColIndexOutOfBounds { row, col, ncols });
                }
                if let Some(prev) = prev {
                    if prev >= col {
                        return Err(PatternError::ColIndexNotSorted {
                            row,
                            prev,
                            next: col,
                        });
                    }
                }
                prev = Some(col);
            }
        }

        Ok(Self {
            nrows,
            ncols,
            row_ptrs,
            col_indices,
            values,
        })
    }

    /// Empty matrix of the given shape.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self {
            nrows,
            ncols,
            row_ptrs: vec![0; nrows + 1],
            col_indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Sparse identity of order `size`.
    pub fn identity(size: usize) -> Self {
        Self::from_diagonal(&vec![1.0; size])
    }

    /// Square diagonal matrix with `diag` on its main diagonal.
    pub fn from_diagonal(diag: &[f64]) -> Self {
        let n = diag.len();
        Self {
            nrows: n,
            ncols: n,
            row_ptrs: (0..=n).collect(),
            col_indices: (0..n).collect(),
            values: diag.to_vec(),
        }
    }

    /// Assembles a matrix from `(row, col, value)` triplets, summing duplicates.
    pub fn from_triplets(nrows: usize, ncols: usize, triplets: &[(usize, usize, f64)]) -> Self {
        let mut coo = CooMatrix::with_capacity(nrows, ncols, triplets.len());
        for &(row, col, value) in triplets {
            coo.push(row, col, value);
        }
        coo.to_csr()
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// `(nrows, ncols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    pub fn is_square(&self) -> bool {
        self.nrows == self.ncols
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn row_ptrs(&self) -> &[usize] {
        &self.row_ptrs
    }

    pub fn col_indices(&self) -> &[usize] {
        &self.col_indices
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Index range in col_indices/values for the given row.
    pub fn row_range(&self, row: usize) -> Range<usize> {
        self.row_ptrs[row]..self.row_ptrs[row + 1]
    }

    /// Sorted column indices and matching values of one row.
    pub fn row(&self, row: usize) -> (&[usize], &[f64]) {
        let range = self.row_range(row);
        (&self.col_indices[range.clone()], &self.values[range])
    }

    /// Stored value at `(row, col)`, or `0.0` when the entry is structurally absent.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        let (cols, vals) = self.row(row);
        match cols.binary_search(&col) {
            Ok(pos) => vals[pos],
            Err(_) => 0.0,
        }
    }

    /// Stored entries in row-major order.
    pub fn triplets(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        (0..self.nrows).flat_map(move |row| {
            self.row_range(row)
                .map(move |idx| (row, self.col_indices[idx], self.values[idx]))
        })
    }

    /// Coordinate view of the stored entries.
    pub fn to_coo(&self) -> CooMatrix {
        let mut coo = CooMatrix::with_capacity(self.nrows, self.ncols, self.nnz());
        for (row, col, value) in self.triplets() {
            coo.push(row, col, value);
        }
        coo
    }

    /// Dense row-major copy. Intended for small matrices and tests.
    pub fn to_dense(&self) -> Vec<Vec<f64>> {
        let mut dense = vec![vec![0.0; self.ncols]; self.nrows];
        for (row, col, value) in self.triplets() {
            dense[row][col] = value;
        }
        dense
    }

    /// Column-compressed copy for faer's sparse factorizations.
    pub fn to_faer(&self) -> Result<SparseColMat<usize, f64>, CreationError> {
        let triplets: Vec<Triplet<usize, usize, f64>> = self
            .triplets()
            .map(|(row, col, val)| Triplet { row, col, val })
            .collect();
        SparseColMat::try_new_from_triplets(self.nrows, self.ncols, &triplets)
    }

    /// Main diagonal, with zeros where no entry is stored.
    pub fn diagonal(&self) -> Vec<f64> {
        let n = self.nrows.min(self.ncols);
        (0..n).map(|i| self.get(i, i)).collect()
    }

    /// Element-wise reciprocal of the main diagonal.
    ///
    /// Zero diagonal entries map to infinity; callers that need a usable inverse
    /// check for that themselves.
    pub fn inverse_diagonal(&self) -> Vec<f64> {
        self.diagonal().into_iter().map(|d| 1.0 / d).collect()
    }

    pub fn transpose(&self) -> Self {
        let mut counts = vec![0usize; self.ncols + 1];
        for &col in &self.col_indices {
            counts[col + 1] += 1;
        }
        for col in 0..self.ncols {
            counts[col + 1] += counts[col];
        }
        let row_ptrs = counts.clone();
        let mut next = counts;
        let mut col_indices = vec![0usize; self.nnz()];
        let mut values = vec![0.0; self.nnz()];
        for (row, col, value) in self.triplets() {
            let dst = next[col];
            col_indices[dst] = row;
            values[dst] = value;
            next[col] += 1;
        }
        Self {
            nrows: self.ncols,
            ncols: self.nrows,
            row_ptrs,
            col_indices,
            values,
        }
    }

    /// Multiplies every stored value by `factor`.
    pub fn scale(&self, factor: f64) -> Self {
        self.map_entries(|_, _, value| value * factor)
    }

    /// Rewrites every stored value with `f(row, col, value)`, keeping the pattern.
    pub fn map_entries(&self, mut f: impl FnMut(usize, usize, f64) -> f64) -> Self {
        let mut out = self.clone();
        for row in 0..self.nrows {
            for idx in self.row_range(row) {
                out.values[idx] = f(row, self.col_indices[idx], self.values[idx]);
            }
        }
        out
    }

    /// Sum `self + other`.
    ///
    /// # Panics
    /// If the shapes differ.
    pub fn add(&self, other: &SparseMatrix) -> Self {
        assert_eq!(self.shape(), other.shape(), "sparse add: shape mismatch");
        let mut row_ptrs = Vec::with_capacity(self.nrows + 1);
        let mut col_indices = Vec::with_capacity(self.nnz() + other.nnz());
        let mut values = Vec::with_capacity(self.nnz() + other.nnz());
        row_ptrs.push(0);
        for row in 0..self.nrows {
            let (a_cols, a_vals) = self.row(row);
            let (b_cols, b_vals) = other.row(row);
            let (mut i, mut j) = (0, 0);
            while i < a_cols.len() || j < b_cols.len() {
                let take_a = j == b_cols.len() || (i < a_cols.len() && a_cols[i] < b_cols[j]);
                let take_b = i == a_cols.len() || (j < b_cols.len() && b_cols[j] < a_cols[i]);
                if take_a {
                    col_indices.push(a_cols[i]);
                    values.push(a_vals[i]);
                    i += 1;
                } else if take_b {
                    col_indices.push(b_cols[j]);
                    values.push(b_vals[j]);
                    j += 1;
                } else {
                    col_indices.push(a_cols[i]);
                    values.push(a_vals[i] + b_vals[j]);
                    i += 1;
                    j += 1;
                }
            }
            row_ptrs.push(col_indices.len());
        }
        Self {
            nrows: self.nrows,
            ncols: self.ncols,
            row_ptrs,
            col_indices,
            values,
        }
    }

    /// Sparse product `self * other` (row-by-row Gustavson accumulation).
    ///
    /// # Panics
    /// If `self.ncols() != other.nrows()`.
    pub fn matmul(&self, other: &SparseMatrix) -> Self {
        assert_eq!(self.ncols, other.nrows, "sparse matmul: inner dimension mismatch");
        let mut row_ptrs = Vec::with_capacity(self.nrows + 1);
        let mut col_indices = Vec::new();
        let mut values = Vec::new();
        let mut accum = vec![0.0; other.ncols];
        let mut marker = vec![usize::MAX; other.ncols];
        let mut touched: Vec<usize> = Vec::new();
        row_ptrs.push(0);
        for row in 0..self.nrows {
            touched.clear();
            let (a_cols, a_vals) = self.row(row);
            for (&k, &a) in a_cols.iter().zip(a_vals) {
                let (b_cols, b_vals) = other.row(k);
                for (&col, &b) in b_cols.iter().zip(b_vals) {
                    if marker[col] != row {
                        marker[col] = row;
                        accum[col] = 0.0;
                        touched.push(col);
                    }
                    accum[col] += a * b;
                }
            }
            touched.sort_unstable();
            for &col in &touched {
                col_indices.push(col);
                values.push(accum[col]);
            }
            row_ptrs.push(col_indices.len());
        }
        Self {
            nrows: self.nrows,
            ncols: other.ncols,
            row_ptrs,
            col_indices,
            values,
        }
    }

    /// Kronecker product `self ⊗ other`.
    ///
    /// Entry `(ia, ja)` of `self` and `(ib, jb)` of `other` land at
    /// `(ia * other.nrows() + ib, ja * other.ncols() + jb)`, so `kron(L, I3)`
    /// interleaves the x/y/z components of each vertex.
    pub fn kron(&self, other: &SparseMatrix) -> Self {
        let nrows = self.nrows * other.nrows;
        let ncols = self.ncols * other.ncols;
        let mut row_ptrs = Vec::with_capacity(nrows + 1);
        let mut col_indices = Vec::with_capacity(self.nnz() * other.nnz());
        let mut values = Vec::with_capacity(self.nnz() * other.nnz());
        row_ptrs.push(0);
        for ia in 0..self.nrows {
            let (a_cols, a_vals) = self.row(ia);
            for ib in 0..other.nrows {
                let (b_cols, b_vals) = other.row(ib);
                for (&ja, &a) in a_cols.iter().zip(a_vals) {
                    for (&jb, &b) in b_cols.iter().zip(b_vals) {
                        col_indices.push(ja * other.ncols + jb);
                        values.push(a * b);
                    }
                }
                row_ptrs.push(col_indices.len());
            }
        }
        Self {
            nrows,
            ncols,
            row_ptrs,
            col_indices,
            values,
        }
    }

    /// Sub-matrix of the rows and columns selected by the two masks.
    ///
    /// Retained rows/columns are renumbered to `0..k` in their original order,
    /// and entries outside the selection are dropped. The result has shape
    /// `(count(row_mask), count(col_mask))`.
    pub fn mask(&self, row_mask: &[bool], col_mask: &[bool]) -> Result<Self, ShapeError> {
        if row_mask.len() != self.nrows {
            return Err(ShapeError::MaskLength {
                axis: "row",
                expected: self.nrows,
                actual: row_mask.len(),
            });
        }
        if col_mask.len() != self.ncols {
            return Err(ShapeError::MaskLength {
                axis: "col",
                expected: self.ncols,
                actual: col_mask.len(),
            });
        }

        let mut remap = vec![usize::MAX; self.ncols];
        let mut ncols = 0;
        for (col, &keep) in col_mask.iter().enumerate() {
            if keep {
                remap[col] = ncols;
                ncols += 1;
            }
        }

        let mut row_ptrs = vec![0];
        let mut col_indices = Vec::new();
        let mut values = Vec::new();
        for row in (0..self.nrows).filter(|&row| row_mask[row]) {
            let (cols, vals) = self.row(row);
            for (&col, &value) in cols.iter().zip(vals) {
                if col_mask[col] {
                    col_indices.push(remap[col]);
                    values.push(value);
                }
            }
            row_ptrs.push(col_indices.len());
        }
        Ok(Self {
            nrows: row_ptrs.len() - 1,
            ncols,
            row_ptrs,
            col_indices,
            values,
        })
    }

    /// `y = A x`.
    pub fn matvec(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.ncols, "matvec: x length");
        assert_eq!(y.len(), self.nrows, "matvec: y length");
        for (row, out) in y.iter_mut().enumerate() {
            let (cols, vals) = self.row(row);
            let mut sum = 0.0;
            for (&col, &value) in cols.iter().zip(vals) {
                sum += value * x[col];
            }
            *out = sum;
        }
    }

    /// `y = Aᵀ x`.
    pub fn matvec_transpose(&self, x: &[f64], y: &mut [f64]) {
        assert_eq!(x.len(), self.nrows, "matvec_transpose: x length");
        assert_eq!(y.len(), self.ncols, "matvec_transpose: y length");
        y.fill(0.0);
        for (row, &xr) in x.iter().enumerate() {
            let (cols, vals) = self.row(row);
            for (&col, &value) in cols.iter().zip(vals) {
                y[col] += value * xr;
            }
        }
    }

    /// Allocating `A x`.
    pub fn mul_vec(&self, x: &[f64]) -> Vec<f64> {
        let mut y = vec![0.0; self.nrows];
        self.matvec(x, &mut y);
        y
    }

    /// Compares `A` against `Aᵀ` entry by entry.
    ///
    /// Two values match when `|a - b| <= rel_tol * max(|a|, |b|)`; an entry
    /// present on one side only must therefore be zero.
    pub fn is_symmetric(&self, rel_tol: f64) -> bool {
        if !self.is_square() {
            return false;
        }
        let t = self.transpose();
        for row in 0..self.nrows {
            let (a_cols, a_vals) = self.row(row);
            let (b_cols, b_vals) = t.row(row);
            let (mut i, mut j) = (0, 0);
            while i < a_cols.len() || j < b_cols.len() {
                let take_a = j == b_cols.len() || (i < a_cols.len() && a_cols[i] < b_cols[j]);
                let (a, b) = if take_a {
                    i += 1;
                    (a_vals[i - 1], 0.0)
                } else if i == a_cols.len() || b_cols[j] < a_cols[i] {
                    j += 1;
                    (0.0, b_vals[j - 1])
                } else {
                    i += 1;
                    j += 1;
                    (a_vals[i - 1], b_vals[j - 1])
                };
                if (a - b).abs() > rel_tol * a.abs().max(b.abs()) {
                    return false;
                }
            }
        }
        true
    }
}

/// Coordinate-format assembly buffer.
///
/// Entries may repeat; [`CooMatrix::to_csr`] sums them (coalesces) in insertion
/// order.
#[derive(Debug, Clone, Default)]
pub struct CooMatrix {
    nrows: usize,
    ncols: usize,
    rows: Vec<usize>,
    cols: Vec<usize>,
    values: Vec<f64>,
}

impl CooMatrix {
    pub fn new(nrows: usize, ncols: usize) -> Self {
        Self::with_capacity(nrows, ncols, 0)
    }

    pub fn with_capacity(nrows: usize, ncols: usize, capacity: usize) -> Self {
        Self {
            nrows,
            ncols,
            rows: Vec::with_capacity(capacity),
            cols: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
        }
    }

    /// Appends one entry.
    ///
    /// # Panics
    /// If `(row, col)` is outside the matrix shape.
    pub fn push(&mut self, row: usize, col: usize, value: f64) {
        assert!(
            row < self.nrows && col < self.ncols,
            "entry ({row}, {col}) outside {}x{} matrix",
            self.nrows,
            self.ncols
        );
        self.rows.push(row);
        self.cols.push(col);
        self.values.push(value);
    }

    /// Number of (possibly duplicated) entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.rows
            .iter()
            .zip(&self.cols)
            .zip(&self.values)
            .map(|((&row, &col), &value)| (row, col, value))
    }

    /// Coalesces duplicates and converts to the canonical CSR form.
    pub fn to_csr(&self) -> SparseMatrix {
        let mut row_start = vec![0usize; self.nrows + 1];
        for &row in &self.rows {
            row_start[row + 1] += 1;
        }
        for row in 0..self.nrows {
            row_start[row + 1] += row_start[row];
        }
        let mut next = row_start.clone();
        let mut order = vec![0usize; self.len()];
        for (k, &row) in self.rows.iter().enumerate() {
            order[next[row]] = k;
            next[row] += 1;
        }

        let mut row_ptrs = Vec::with_capacity(self.nrows + 1);
        let mut col_indices = Vec::with_capacity(self.len());
        let mut values = Vec::with_capacity(self.len());
        row_ptrs.push(0);
        for row in 0..self.nrows {
            let segment = &mut order[row_start[row]..row_start[row + 1]];
            segment.sort_by_key(|&k| self.cols[k]);
            let mut last: Option<usize> = None;
            for &k in segment.iter() {
                let col = self.cols[k];
                if last == Some(col) {
                    if let Some(value) = values.last_mut() {
                        *value += self.values[k];
                    }
                } else {
                    col_indices.push(col);
                    values.push(self.values[k]);
                    last = Some(col);
                }
            }
            row_ptrs.push(col_indices.len());
        }

        SparseMatrix {
            nrows: self.nrows,
            ncols: self.ncols,
            row_ptrs,
            col_indices,
            values,
        }
    }
}

pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    let mut sum = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        sum += x * y;
    }
    sum
}

pub(crate) fn l2_norm(x: &[f64]) -> f64 {
    dot(x, x).sqrt()
}
