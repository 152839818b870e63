use nalgebra::{Isometry3, Matrix3, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};

pub fn centroid(points: &[Point3<f64>]) -> Option<Point3<f64>> {
    if points.is_empty() {
        return None;
    }
    let sum = points
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords);
    Some(Point3::from(sum / points.len() as f64))
}

pub fn calculate_rmsd(coords1: &[Point3<f64>], coords2: &[Point3<f64>]) -> Option<f64> {
    if coords1.len() != coords2.len() || coords1.is_empty() {
        return None;
    }
    let n = coords1.len() as f64;
    let squared_dist_sum: f64 = coords1
        .iter()
        .zip(coords2.iter())
        .map(|(p1, p2)| (p1 - p2).norm_squared())
        .sum();
    Some((squared_dist_sum / n).sqrt())
}

/// For every point in `points`, the distance to the closest point in `reference`,
/// together with the overall minimum.
///
/// Returns `None` if either set is empty.
pub fn min_distances(
    points: &[Point3<f64>],
    reference: &[Point3<f64>],
) -> Option<(Vec<f64>, f64)> {
    if points.is_empty() || reference.is_empty() {
        return None;
    }
    let per_point: Vec<f64> = points
        .iter()
        .map(|p| {
            reference
                .iter()
                .map(|r| (p - r).norm())
                .fold(f64::INFINITY, f64::min)
        })
        .collect();
    let overall = per_point.iter().copied().fold(f64::INFINITY, f64::min);
    Some((per_point, overall))
}

/// Least-squares rigid superposition (Kabsch) of `mobile` onto `reference`.
///
/// The returned isometry maps `mobile[i]` as close as possible to
/// `reference[i]` using a proper rotation and a translation; no scaling and no
/// reflection. Returns `None` if the sets are empty, differ in length, or the
/// SVD does not converge.
pub fn superpose(mobile: &[Point3<f64>], reference: &[Point3<f64>]) -> Option<Isometry3<f64>> {
    if mobile.len() != reference.len() {
        return None;
    }
    let mobile_center = centroid(mobile)?;
    let reference_center = centroid(reference)?;

    let mut h: Matrix3<f64> = Matrix3::zeros();
    for (m, r) in mobile.iter().zip(reference) {
        h += (m - mobile_center) * (r - reference_center).transpose();
    }

    let svd = h.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let mut r: Matrix3<f64> = v_t.transpose() * u.transpose();
    if r.determinant() < 0.0 {
        let mut v_t_adj = v_t;
        v_t_adj.row_mut(2).neg_mut();
        r = v_t_adj.transpose() * u.transpose();
    }

    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    let translation = reference_center.coords - rotation * mobile_center.coords;
    Some(Isometry3::from_parts(
        Translation3::from(translation),
        rotation,
    ))
}
