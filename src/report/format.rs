//! Formatted terminal output.
//!
//! We keep formatting code in one place so:
//! - the fitting code stays clean and testable
//! - output changes are localized

use crate::domain::{FitResult, MeasurementSet, VariationTemplate};
use crate::fit::SeedResult;
use crate::report::PointResidual;

/// Format the run summary: inputs, fit status, parameters and chi2 split.
pub fn format_fit_summary(set: &MeasurementSet, result: &FitResult) -> String {
    let mut out = String::new();

    out.push_str("=== jesfit - global JES calibration ===\n");
    out.push_str("Channels:\n");
    for ch in set.channels() {
        let c = ch.counts();
        out.push_str(&format!(
            "  {:<20} used {:>3} of {:>3} (invalid {}, outside window {})\n",
            truncate(ch.name(), 20),
            c.used,
            c.read,
            c.invalid,
            c.outside_window
        ));
    }
    out.push_str(&format!(
        "Anchor: JES({:.1} GeV) = {:.4} ± {:.4}\n",
        result.anchor.pt, result.anchor.jes, result.anchor.err
    ));

    let status = match result.status {
        crate::domain::FitStatus::Converged => "converged".to_string(),
        crate::domain::FitStatus::NotConverged(reason) => format!("NOT converged ({reason})"),
    };
    out.push_str(&format!(
        "\nStatus: {status} after {} iterations (edm {:.2e})\n",
        result.iterations, result.edm
    ));

    let err = result.shape_errors();
    out.push_str("Shape parameters:\n");
    for k in 0..result.shape.len() {
        out.push_str(&format!("  p{k} = {:>10.6} ± {:.6}\n", result.shape[k], err[k]));
    }

    if !result.nuisance.is_empty() {
        out.push_str("Nuisance parameters:\n");
        let nu_err = result.nuisance_errors();
        for ((name, nu), e) in result.source_names.iter().zip(&result.nuisance).zip(nu_err) {
            out.push_str(&format!("  {:<28} {:>8.3} ± {:.3}\n", truncate(name, 28), nu, e));
        }
    }

    let chi2 = &result.chi2;
    out.push_str(&format!(
        "\nchi2 / ndf = {:.2} / {}",
        chi2.total, result.dof
    ));
    match result.chi2_per_dof() {
        Some(r) => out.push_str(&format!(" = {r:.2}\n")),
        None => out.push('\n'),
    }
    out.push_str(&format!(
        "  data {:.2} ({} points), sources {:.2}, anchor {:.2}\n",
        chi2.data, result.n_points, chi2.sources, chi2.anchor
    ));
    for (ch, c) in set.channels().iter().zip(&chi2.per_channel) {
        out.push_str(&format!("  {:<20} {:.2}\n", truncate(ch.name(), 20), c));
    }

    out
}

/// Format a residual table, one line per point.
pub fn format_residual_table(rows: &[PointResidual]) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:<16} {:>8} {:>8} {:>10} {:>10} {:>10} {:>8}",
            "channel", "pt", "pt_ref", "data", "shift", "fit", "pull"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(
        format!(
            "{:-<16} {:-<8} {:-<8} {:-<10} {:-<10} {:-<10} {:-<8}",
            "", "", "", "", "", "", ""
        )
        .trim_end(),
    );
    out.push('\n');

    for r in rows {
        out.push_str(
            format!(
                "{:<16} {:>8.1} {:>8.1} {:>10.5} {:>10.5} {:>10.5} {:>8.2}",
                truncate(&r.channel, 16),
                r.pt,
                r.pt_ref,
                r.data,
                r.shift,
                r.fit,
                r.pull
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

pub fn format_seed_summary(seed: &SeedResult) -> String {
    let mut out = String::new();
    out.push_str(&format!("Seed from channel '{}':\n", seed.channel));
    out.push_str(&format!("{:>10} {:>10} {:>10}\n", "pt", "jes", "err"));
    for p in &seed.inferred {
        out.push_str(&format!("{:>10.1} {:>10.5} {:>10.5}\n", p.x, p.y, p.y_err));
    }
    out.push_str(&format!(
        "curve: {} (chi2 {:.2} / {})\n",
        fmt_vec(&seed.curve.coeffs),
        seed.curve.chi2,
        seed.curve.ndf
    ));
    out
}

pub fn format_templates(templates: &[VariationTemplate]) -> String {
    let mut out = String::new();
    for t in templates {
        let max = t.shift.iter().fold(0.0f64, |m, s| m.max(s.abs()));
        out.push_str(&format!(
            "{:<28} λ = {:.3e}  v = {}  max |shift| = {:.2e}\n",
            t.name,
            t.eigenvalue,
            fmt_vec(&t.eigenvector),
            max
        ));
    }
    out
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.6}")).collect();
    format!("[{}]", parts.join(", "))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn residual_table_has_header_and_rows() {
        let rows = vec![PointResidual {
            channel: "multijet".to_string(),
            pt: 300.0,
            pt_ref: 120.0,
            data: 1.01,
            shift: 0.0,
            fit: 1.0,
            pull: 1.0,
        }];
        let s = format_residual_table(&rows);
        let lines: Vec<&str> = s.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("channel"));
        assert!(lines[2].starts_with("multijet"));
        assert!(lines[2].ends_with("1.00"));
    }

    #[test]
    fn truncate_marks_cut_names() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcdefgh", 5), "abcd.");
    }
}
