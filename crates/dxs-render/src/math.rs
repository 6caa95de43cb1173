//! Matrix and vector helpers
//!
//! Matrices follow the device's row-vector convention: a point is
//! transformed as `p * M`, and `view * proj` maps world space to clip space.

pub type Matrix4f = nalgebra::Matrix4<f32>;
pub type Vector3f = nalgebra::Vector3<f32>;
pub type Vector4f = nalgebra::Vector4<f32>;

/// Identity transform
pub fn identity() -> Matrix4f {
    Matrix4f::identity()
}

/// Whether `m` is exactly the identity
pub fn is_identity(m: &Matrix4f) -> bool {
    *m == Matrix4f::identity()
}

/// Transform a direction by the upper 3x3 of `m` (row-vector convention)
pub fn transform_normal(v: &Vector3f, m: &Matrix4f) -> Vector3f {
    Vector3f::new(
        v.x * m[(0, 0)] + v.y * m[(1, 0)] + v.z * m[(2, 0)],
        v.x * m[(0, 1)] + v.y * m[(1, 1)] + v.z * m[(2, 1)],
        v.x * m[(0, 2)] + v.y * m[(1, 2)] + v.z * m[(2, 2)],
    )
}

/// Transform a point by `m` (row-vector convention, w = 1)
pub fn transform_point(p: &Vector3f, m: &Matrix4f) -> Vector3f {
    let t = transform_normal(p, m);
    Vector3f::new(t.x + m[(3, 0)], t.y + m[(3, 1)], t.z + m[(3, 2)])
}

/// Translation in row-vector convention
pub fn translation(x: f32, y: f32, z: f32) -> Matrix4f {
    let mut m = Matrix4f::identity();
    m[(3, 0)] = x;
    m[(3, 1)] = y;
    m[(3, 2)] = z;
    m
}

/// Rows of `m` as shader constant registers
pub fn to_registers(m: &Matrix4f) -> [[f32; 4]; 4] {
    let mut out = [[0.0; 4]; 4];
    for (r, row) in out.iter_mut().enumerate() {
        for (c, v) in row.iter_mut().enumerate() {
            *v = m[(r, c)];
        }
    }
    out
}

/// Unpack a packed `0xAARRGGBB` colour into normalised RGB
pub fn unpack_rgb(argb: u32) -> [f32; 3] {
    [
        ((argb >> 16) & 0xFF) as f32 / 255.0,
        ((argb >> 8) & 0xFF) as f32 / 255.0,
        (argb & 0xFF) as f32 / 255.0,
    ]
}

/// Pack normalised RGB plus alpha into `0xAARRGGBB`
pub fn pack_argb(rgb: [f32; 3], alpha: f32) -> u32 {
    let ch = |v: f32| (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u32;
    (ch(alpha) << 24) | (ch(rgb[0]) << 16) | (ch(rgb[1]) << 8) | ch(rgb[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_point_translation() {
        let m = translation(1.0, 2.0, 3.0);
        let p = transform_point(&Vector3f::new(1.0, 1.0, 1.0), &m);
        assert_eq!(p, Vector3f::new(2.0, 3.0, 4.0));
        // Directions ignore translation
        let n = transform_normal(&Vector3f::new(0.0, 0.0, 1.0), &m);
        assert_eq!(n, Vector3f::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn test_color_packing() {
        assert_eq!(pack_argb([1.0, 0.0, 0.0], 0.0), 0x00FF_0000);
        let rgb = unpack_rgb(0x0080_40FF);
        assert!((rgb[0] - 128.0 / 255.0).abs() < 1e-6);
        assert!((rgb[1] - 64.0 / 255.0).abs() < 1e-6);
        assert!((rgb[2] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_registers_are_rows() {
        let m = translation(5.0, 6.0, 7.0);
        let regs = to_registers(&m);
        assert_eq!(regs[3], [5.0, 6.0, 7.0, 1.0]);
        assert_eq!(regs[0], [1.0, 0.0, 0.0, 0.0]);
    }
}
