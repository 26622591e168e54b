//! Output rendering for CLI results

use crate::core::transport::PortDescriptor;
use serde::Serialize;

/// How results are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human readable text
    #[default]
    Text,
    /// JSON, one document per command
    Json,
}

/// Result of a `probe` run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeReport {
    /// Port the programmer answered on
    pub port: String,
    /// Raw flash id as hex
    pub flash_id: String,
    /// Chip name, if the id is known
    pub chip: Option<String>,
}

/// Render a port listing
pub fn format_ports(ports: &[PortDescriptor], format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(ports).unwrap_or_default(),
        OutputFormat::Text if ports.is_empty() => "No serial ports found".to_string(),
        OutputFormat::Text => ports
            .iter()
            .map(|p| {
                let ids = match (&p.vendor_id, &p.product_id) {
                    (Some(vid), Some(pid)) => format!(" [{}:{}]", vid, pid),
                    _ => String::new(),
                };
                let maker = p
                    .manufacturer
                    .as_deref()
                    .map(|m| format!(" {}", m))
                    .unwrap_or_default();
                format!("{}{}{}", p.path, ids, maker)
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Render a probe report
pub fn format_probe(report: &ProbeReport, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
        OutputFormat::Text => format!(
            "Port:     {}\nFlash id: {}\nChip:     {}",
            report.port,
            report.flash_id,
            report.chip.as_deref().unwrap_or("unknown")
        ),
    }
}

/// Classic 16-bytes-per-line hex dump starting at `base`; line addresses
/// wrap at the top of the 32-bit space
pub fn hex_dump(data: &[u8], base: u32) -> String {
    data.chunks(16)
        .zip(std::iter::successors(Some(base), |a| Some(a.wrapping_add(16))))
        .map(|(line, address)| {
            let hex = line
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(" ");
            let ascii: String = line
                .iter()
                .map(|&b| if (0x20..=0x7e).contains(&b) { b as char } else { '.' })
                .collect();
            format!("{:08x}  {:<47}  |{}|", address, hex, ascii)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
