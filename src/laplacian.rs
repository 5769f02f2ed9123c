use crate::mesh::{cross, dot3, norm3, sub, TriMesh};
use crate::sparse::{CooMatrix, SparseMatrix};

/// Guards the cotangent denominator `‖e1 × e2‖` of degenerate triangles.
pub const COTANGENT_EPS: f64 = 1e-8;

/// Cotangent Laplacian of a triangle mesh.
///
/// Every triangle `(i, j, k)` adds half the cotangent of the angle at each
/// corner to the edge opposite that corner, symmetrically. The diagonal holds
/// the negated row sum, so the result is symmetric, negative semidefinite and
/// annihilates constants.
pub fn cotangent_laplacian(mesh: &TriMesh) -> SparseMatrix {
    let n = mesh.vertex_count();
    let v = mesh.positions();
    let tris = mesh.triangles();
    let mut coo = CooMatrix::with_capacity(n, n, 6 * tris.len() + n);
    let mut row_sum = vec![0.0; n];

    for &[i, j, k] in tris {
        let cot_i = cotangent(sub(v[j], v[i]), sub(v[k], v[i]));
        let cot_j = cotangent(sub(v[i], v[j]), sub(v[k], v[j]));
        let cot_k = cotangent(sub(v[i], v[k]), sub(v[j], v[k]));

        for (a, b, cot) in [
            (j, k, cot_i),
            (k, j, cot_i),
            (k, i, cot_j),
            (i, k, cot_j),
            (i, j, cot_k),
            (j, i, cot_k),
        ] {
            let w = 0.5 * cot;
            coo.push(a, b, w);
            row_sum[a] += w;
        }
    }

    for (row, sum) in row_sum.into_iter().enumerate() {
        coo.push(row, row, -sum);
    }
    coo.to_csr()
}

fn cotangent(e1: [f64; 3], e2: [f64; 3]) -> f64 {
    dot3(e1, e2) / (norm3(cross(e1, e2)) + COTANGENT_EPS)
}
