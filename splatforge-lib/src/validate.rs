use crate::error::{Error, Result};
use crate::structures::{sh_coeffs_per_point, GaussianCloud};

/// Structural validation of a [`GaussianCloud`].
///
/// Always checks that `num_points` is non-negative and that every primary
/// array has the length its shape demands. In strict mode the first
/// violation is returned as an error and the six primary arrays are
/// additionally swept for non-finite values. In non-strict mode the
/// violations are collected and handed back as warnings; the cloud is
/// still usable at the caller's discretion.
pub fn validate_basic(ir: &GaussianCloud, strict: bool) -> Result<Vec<String>> {
    let mut warnings = Vec::new();

    if ir.num_points < 0 {
        let msg = format!("num_points is negative: {}", ir.num_points);
        if strict {
            return Err(Error::SizeMismatch(msg));
        }
        warnings.push(msg);
        return Ok(warnings);
    }

    let n = ir.num_points as usize;
    let expected: [(&str, usize, usize); 6] = [
        ("positions", ir.positions.len(), n * 3),
        ("scales", ir.scales.len(), n * 3),
        ("rotations", ir.rotations.len(), n * 4),
        ("alphas", ir.alphas.len(), n),
        ("colors", ir.colors.len(), n * 3),
        ("sh", ir.sh.len(), n * sh_coeffs_per_point(ir.meta.sh_degree)),
    ];

    for (name, got, want) in expected {
        if got != want {
            let msg = format!("{} size mismatch, got {}, expect {}", name, got, want);
            if strict {
                return Err(Error::SizeMismatch(msg));
            }
            warnings.push(msg);
        }
    }

    if strict {
        let arrays: [(&str, &[f32]); 6] = [
            ("positions", &ir.positions),
            ("scales", &ir.scales),
            ("rotations", &ir.rotations),
            ("alphas", &ir.alphas),
            ("colors", &ir.colors),
            ("sh", &ir.sh),
        ];
        for (name, values) in arrays {
            if values.iter().any(|v| !v.is_finite()) {
                return Err(Error::NonFinite(format!(
                    "{} contains a non-finite value",
                    name
                )));
            }
        }
    }

    Ok(warnings)
}

/// Shared post-read / pre-write hook: strict failures abort, non-strict
/// findings go to the warning channel.
pub(crate) fn check(ir: &GaussianCloud, strict: bool) -> Result<()> {
    let warnings = validate_basic(ir, strict)?;
    for w in &warnings {
        tracing::warn!(target: "splatforge::validate", "{}", w);
    }
    Ok(())
}
