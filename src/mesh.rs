use core::fmt;
use std::collections::HashMap;

/// Structural input errors, raised before any numeric work starts.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeError {
    /// A face references a vertex that does not exist.
    FaceIndexOutOfRange {
        face: usize,
        index: usize,
        vertex_count: usize,
    },
    /// Normal count differs from the vertex count.
    NormalCount { expected: usize, actual: usize },
    /// A per-vertex field has the wrong length.
    FieldLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    /// A per-vertex field holds NaN or infinity.
    NonFiniteField { field: &'static str, index: usize },
    /// A vertex position holds NaN or infinity.
    NonFinitePosition { index: usize },
    /// A fixed-vertex index is not a vertex of the mesh.
    FixedIndexOutOfRange { index: usize, vertex_count: usize },
    /// Explicit fixed targets do not match the fixed index count.
    TargetCount { expected: usize, actual: usize },
    /// A system matrix is not square.
    NotSquare { nrows: usize, ncols: usize },
    /// The right-hand side length differs from the system order.
    RhsLength { expected: usize, actual: usize },
    /// A row or column mask has the wrong length.
    MaskLength {
        axis: &'static str,
        expected: usize,
        actual: usize,
    },
}

impl fmt::Display for ShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FaceIndexOutOfRange {
                face,
                index,
                vertex_count,
            } => write!(
                f,
                "face {face} references vertex {index} but the mesh has {vertex_count} vertices"
            ),
            Self::NormalCount { expected, actual } => {
                write!(f, "expected {expected} normals, got {actual}")
            }
            Self::FieldLength {
                field,
                expected,
                actual,
            } => write!(f, "field `{field}` has length {actual}, expected {expected}"),
            Self::NonFiniteField { field, index } => {
                write!(f, "field `{field}` is not finite at vertex {index}")
            }
            Self::NonFinitePosition { index } => {
                write!(f, "vertex {index} has a non-finite position")
            }
            Self::FixedIndexOutOfRange {
                index,
                vertex_count,
            } => write!(
                f,
                "fixed vertex {index} out of range for {vertex_count} vertices"
            ),
            Self::TargetCount { expected, actual } => {
                write!(f, "expected {expected} fixed targets, got {actual}")
            }
            Self::NotSquare { nrows, ncols } => {
                write!(f, "system matrix must be square, got {nrows}x{ncols}")
            }
            Self::RhsLength { expected, actual } => {
                write!(f, "right-hand side length {actual} does not match order {expected}")
            }
            Self::MaskLength {
                axis,
                expected,
                actual,
            } => write!(f, "{axis} mask length {actual} does not match {expected}"),
        }
    }
}

impl std::error::Error for ShapeError {}

/// Validated triangle mesh: positions, triangles and optional vertex normals.
#[derive(Debug, Clone)]
pub struct TriMesh {
    positions: Vec<[f64; 3]>,
    triangles: Vec<[usize; 3]>,
    normals: Option<Vec<[f64; 3]>>,
}

impl TriMesh {
    /// Checks that positions are finite and every face index is `< positions.len()`.
    pub fn new(positions: Vec<[f64; 3]>, triangles: Vec<[usize; 3]>) -> Result<Self, ShapeError> {
        if let Some(index) = positions
            .iter()
            .position(|p| !p.iter().all(|c| c.is_finite()))
        {
            return Err(ShapeError::NonFinitePosition { index });
        }
        let vertex_count = positions.len();
        for (face, tri) in triangles.iter().enumerate() {
            if let Some(&index) = tri.iter().find(|&&i| i >= vertex_count) {
                return Err(ShapeError::FaceIndexOutOfRange {
                    face,
                    index,
                    vertex_count,
                });
            }
        }
        Ok(Self {
            positions,
            triangles,
            normals: None,
        })
    }

    /// Attaches per-vertex normals. Each row is renormalized; zero rows stay zero.
    pub fn with_normals(mut self, normals: Vec<[f64; 3]>) -> Result<Self, ShapeError> {
        if normals.len() != self.positions.len() {
            return Err(ShapeError::NormalCount {
                expected: self.positions.len(),
                actual: normals.len(),
            });
        }
        self.normals = Some(normals.into_iter().map(normalize).collect());
        Ok(self)
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> &[[f64; 3]] {
        &self.positions
    }

    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    /// Normals passed through [`TriMesh::with_normals`], if any.
    pub fn normals(&self) -> Option<&[[f64; 3]]> {
        self.normals.as_deref()
    }

    /// Supplied normals, or area-weighted normals computed from the faces.
    pub fn normals_or_computed(&self) -> Vec<[f64; 3]> {
        match &self.normals {
            Some(normals) => normals.clone(),
            None => self.vertex_normals(),
        }
    }

    /// Area-weighted unit vertex normals.
    ///
    /// Each face adds its unnormalized cross product (twice its area) to its
    /// three corners. Isolated vertices get a zero normal.
    pub fn vertex_normals(&self) -> Vec<[f64; 3]> {
        let mut acc = vec![[0.0; 3]; self.positions.len()];
        for &[i, j, k] in &self.triangles {
            let n = cross(
                sub(self.positions[j], self.positions[i]),
                sub(self.positions[k], self.positions[i]),
            );
            for v in [i, j, k] {
                for c in 0..3 {
                    acc[v][c] += n[c];
                }
            }
        }
        acc.into_iter().map(normalize).collect()
    }

    /// Vertices lying on an edge that belongs to exactly one triangle, ascending.
    pub fn boundary_vertices(&self) -> Vec<usize> {
        let mut edge_use: HashMap<(usize, usize), usize> = HashMap::new();
        for &[i, j, k] in &self.triangles {
            for (a, b) in [(i, j), (j, k), (k, i)] {
                *edge_use.entry((a.min(b), a.max(b))).or_insert(0) += 1;
            }
        }
        let mut on_boundary = vec![false; self.positions.len()];
        for (&(a, b), &count) in &edge_use {
            if count == 1 {
                on_boundary[a] = true;
                on_boundary[b] = true;
            }
        }
        (0..on_boundary.len()).filter(|&v| on_boundary[v]).collect()
    }
}

/// Scalar weight per vertex, or one constant broadcast to every vertex.
#[derive(Debug, Clone, PartialEq)]
pub enum VertexField {
    Constant(f64),
    PerVertex(Vec<f64>),
}

impl VertexField {
    /// Expands to exactly `vertex_count` finite values.
    pub fn resolve(
        &self,
        field: &'static str,
        vertex_count: usize,
    ) -> Result<Vec<f64>, ShapeError> {
        let values = match self {
            Self::Constant(value) => vec![*value; vertex_count],
            Self::PerVertex(values) => {
                if values.len() != vertex_count {
                    return Err(ShapeError::FieldLength {
                        field,
                        expected: vertex_count,
                        actual: values.len(),
                    });
                }
                values.clone()
            }
        };
        match values.iter().position(|v| !v.is_finite()) {
            Some(index) => Err(ShapeError::NonFiniteField { field, index }),
            None => Ok(values),
        }
    }
}

impl From<f64> for VertexField {
    fn from(value: f64) -> Self {
        Self::Constant(value)
    }
}

impl From<Vec<f64>> for VertexField {
    fn from(values: Vec<f64>) -> Self {
        Self::PerVertex(values)
    }
}

/// Fixed/free partition of the vertices of a mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedVertices {
    is_fixed: Vec<bool>,
}

impl FixedVertices {
    /// Marks `indices` as fixed; duplicates are allowed.
    pub fn from_indices(vertex_count: usize, indices: &[usize]) -> Result<Self, ShapeError> {
        let mut is_fixed = vec![false; vertex_count];
        for &index in indices {
            if index >= vertex_count {
                return Err(ShapeError::FixedIndexOutOfRange {
                    index,
                    vertex_count,
                });
            }
            is_fixed[index] = true;
        }
        Ok(Self { is_fixed })
    }

    pub fn vertex_count(&self) -> usize {
        self.is_fixed.len()
    }

    pub fn is_fixed(&self, vertex: usize) -> bool {
        self.is_fixed[vertex]
    }

    pub fn fixed_mask(&self) -> &[bool] {
        &self.is_fixed
    }

    pub fn free_mask(&self) -> Vec<bool> {
        self.is_fixed.iter().map(|&f| !f).collect()
    }

    pub fn fixed_indices(&self) -> Vec<usize> {
        (0..self.is_fixed.len()).filter(|&v| self.is_fixed[v]).collect()
    }

    pub fn free_indices(&self) -> Vec<usize> {
        (0..self.is_fixed.len()).filter(|&v| !self.is_fixed[v]).collect()
    }

    pub fn free_count(&self) -> usize {
        self.is_fixed.iter().filter(|&&f| !f).count()
    }

    /// Free mask repeated `dofs` times per vertex, matching `kron(_, I_dofs)` ordering.
    pub fn free_dof_mask(&self, dofs: usize) -> Vec<bool> {
        self.is_fixed
            .iter()
            .flat_map(|&f| std::iter::repeat(!f).take(dofs))
            .collect()
    }
}

pub(crate) fn sub(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub(crate) fn dot3(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub(crate) fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub(crate) fn norm3(a: [f64; 3]) -> f64 {
    dot3(a, a).sqrt()
}

fn normalize(a: [f64; 3]) -> [f64; 3] {
    let len = norm3(a);
    if len > 0.0 {
        [a[0] / len, a[1] / len, a[2] / len]
    } else {
        [0.0; 3]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> TriMesh {
        TriMesh::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]],
            vec![[0, 1, 2], [0, 2, 3]],
        )
        .unwrap()
    }

    #[test]
    fn rejects_out_of_range_faces() {
        let err = TriMesh::new(vec![[0.0; 3]; 2], vec![[0, 1, 2]]).unwrap_err();
        assert_eq!(
            err,
            ShapeError::FaceIndexOutOfRange {
                face: 0,
                index: 2,
                vertex_count: 2
            }
        );
    }

    #[test]
    fn flat_quad_normals_point_up() {
        for n in quad().vertex_normals() {
            assert!((n[2] - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn supplied_normals_are_renormalized() {
        let mesh = quad().with_normals(vec![[0.0, 0.0, 2.0]; 4]).unwrap();
        assert_eq!(mesh.normals().unwrap()[0], [0.0, 0.0, 1.0]);
    }

    #[test]
    fn every_quad_corner_is_boundary() {
        assert_eq!(quad().boundary_vertices(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn constant_field_broadcasts_and_checks_length() {
        assert_eq!(VertexField::from(2.0).resolve("w", 3).unwrap(), vec![2.0; 3]);
        let err = VertexField::from(vec![1.0]).resolve("w", 3).unwrap_err();
        assert!(matches!(err, ShapeError::FieldLength { field: "w", .. }));
    }

    #[test]
    fn free_dof_mask_repeats_per_vertex() {
        let fixed = FixedVertices::from_indices(2, &[1]).unwrap();
        assert_eq!(fixed.free_dof_mask(3), vec![true, true, true, false, false, false]);
    }
}
