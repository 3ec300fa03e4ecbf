//! CSV exports of templates, derived graphs and the fitted band.
//!
//! The files are meant to be easy to consume in spreadsheets or downstream
//! scripts; one row per bin or per point.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::domain::{ChannelGraphs, VariationTemplate};
use crate::error::CalibError;

fn create(path: &Path) -> Result<File, CalibError> {
    File::create(path).map_err(|e| {
        CalibError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to create '{}': {e}", path.display()),
        ))
    })
}

pub fn write_templates_csv(path: &Path, templates: &[VariationTemplate]) -> Result<(), CalibError> {
    write_templates(create(path)?, templates)
}

pub fn write_templates<W: Write>(out: W, templates: &[VariationTemplate]) -> Result<(), CalibError> {
    let mut w = csv::Writer::from_writer(out);
    w.write_record(["name", "bin", "pt_lo", "pt_hi", "pt", "nominal", "shift", "error"])?;
    for t in templates {
        for bin in 0..t.binning.n_bins() {
            let (lo, hi) = t.binning.bin_bounds(bin);
            w.write_record([
                t.name.clone(),
                bin.to_string(),
                format!("{lo}"),
                format!("{hi}"),
                format!("{:.4}", t.pt[bin]),
                format!("{:.8}", t.nominal[bin]),
                format!("{:.8e}", t.shift[bin]),
                format!("{:.8e}", t.error(bin)),
            ])?;
        }
    }
    w.flush()?;
    Ok(())
}

pub fn write_graphs_csv(path: &Path, graphs: &[ChannelGraphs]) -> Result<(), CalibError> {
    write_graphs(create(path)?, graphs)
}

pub fn write_graphs<W: Write>(out: W, graphs: &[ChannelGraphs]) -> Result<(), CalibError> {
    let mut w = csv::Writer::from_writer(out);
    w.write_record(["channel", "kind", "pt", "jes", "err"])?;
    for g in graphs {
        let rows = g
            .shifted
            .iter()
            .map(|p| ("shifted", p))
            .chain(g.reference.iter().map(|p| ("reference", p)));
        for (kind, p) in rows {
            w.write_record([
                g.channel.clone(),
                kind.to_string(),
                format!("{:.4}", p.x),
                format!("{:.8}", p.y),
                format!("{:.8}", p.y_err),
            ])?;
        }
    }
    w.flush()?;
    Ok(())
}

/// `(pt, lo, nominal, hi)` rows as produced by the uncertainty propagator.
pub fn write_band_csv(path: &Path, band: &[(f64, f64, f64, f64)]) -> Result<(), CalibError> {
    let mut w = csv::Writer::from_writer(create(path)?);
    w.write_record(["pt", "lo", "nominal", "hi"])?;
    for &(pt, lo, f, hi) in band {
        w.write_record([
            format!("{pt:.4}"),
            format!("{lo:.8}"),
            format!("{f:.8}"),
            format!("{hi:.8}"),
        ])?;
    }
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Binning, MeasurementPoint};

    #[test]
    fn templates_have_one_row_per_bin() {
        let binning = Binning::new(vec![200.0, 300.0, 400.0]).unwrap();
        let t = VariationTemplate {
            name: "jes_eig0".to_string(),
            index: 0,
            eigenvalue: 1e-4,
            eigenvector: vec![1.0, 0.0, 0.0],
            binning,
            pt: vec![250.0, 350.0],
            nominal: vec![0.99, 0.98],
            shift: vec![-0.01, 0.01],
        };
        let mut buf = Vec::new();
        write_templates(&mut buf, &[t]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("name,bin,pt_lo"));
        assert!(lines[1].starts_with("jes_eig0,0,200,300,250.0000"));
        assert!(lines[1].ends_with("1.00000000e-2"));
    }

    #[test]
    fn graphs_list_shifted_then_reference() {
        let g = ChannelGraphs {
            channel: "mjb".to_string(),
            shifted: vec![MeasurementPoint::new(400.0, 0.99, 0.003)],
            reference: vec![MeasurementPoint::new(200.0, 0.98, 0.004)],
        };
        let mut buf = Vec::new();
        write_graphs(&mut buf, &[g]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "mjb,shifted,400.0000,0.99000000,0.00300000");
        assert_eq!(lines[2], "mjb,reference,200.0000,0.98000000,0.00400000");
    }
}
