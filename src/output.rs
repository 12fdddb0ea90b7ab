//! Rendering the VRP store to the formats downstream routers expect.
//!
//! Each format is a small, stateless writer over the store's iterator and
//! the run's [`Metrics`] -- there's no validation logic here, just text.

use std::io;
use crate::config::{OutputFormat as ConfigFormat, OutputFormats};
use crate::metrics::Metrics;
use crate::resources::{addr_to_ip, Afi};
use crate::store::{Vrp, VrpStore};

/// A single VRP rendering target.
///
/// `header`/`footer` bracket the run; `entry` is called once per VRP in
/// the store's iteration order. Default no-ops cover the formats (CSV,
/// JSON) that don't split output by address family.
pub trait OutputFormat {
    fn header(&self, _metrics: &Metrics, _out: &mut dyn io::Write) -> io::Result<()> {
        Ok(())
    }

    fn entry(&self, vrp: &Vrp, first: bool, out: &mut dyn io::Write) -> io::Result<()>;

    fn footer(&self, _metrics: &Metrics, _out: &mut dyn io::Write) -> io::Result<()> {
        Ok(())
    }

    /// Whether this format wants this VRP at all (used by the BIRD v1
    /// split, which runs two passes over the same store filtering by
    /// address family).
    fn wants(&self, _vrp: &Vrp) -> bool {
        true
    }
}

/// Writes every VRP in `store` through `format`, in the store's order.
///
/// This logs nothing and swallows a broken pipe on `out` as a clean
/// stop, matching the source tool's treatment of a reader that hung up
/// early.
pub fn write_vrps<F: OutputFormat + ?Sized>(
    format: &F,
    store: &VrpStore,
    metrics: &Metrics,
    out: &mut dyn io::Write,
) -> io::Result<()> {
    match write_vrps_inner(format, store, metrics, out) {
        Ok(()) => Ok(()),
        Err(ref err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err),
    }
}

fn write_vrps_inner<F: OutputFormat + ?Sized>(
    format: &F,
    store: &VrpStore,
    metrics: &Metrics,
    out: &mut dyn io::Write,
) -> io::Result<()> {
    format.header(metrics, out)?;
    let mut first = true;
    for vrp in store.iter() {
        if !format.wants(vrp) {
            continue;
        }
        format.entry(vrp, first, out)?;
        first = false;
    }
    format.footer(metrics, out)
}

/// Writes every format selected in `formats` to its own file under
/// `output_dir`, named after the format (`csv`, `json`, `openbgpd`,
/// `bird1v4.conf`, `bird1v6.conf`, `bird2.conf`).
pub fn write_selected(
    formats: OutputFormats,
    store: &VrpStore,
    metrics: &Metrics,
    output_dir: &std::path::Path,
) -> io::Result<()> {
    for format in formats.iter() {
        let (name, writer): (&str, Box<dyn OutputFormat>) = match format {
            ConfigFormat::Csv => ("csv", Box::new(CsvFormat)),
            ConfigFormat::Json => ("json", Box::new(JsonFormat)),
            ConfigFormat::OpenBgpd => ("openbgpd", Box::new(OpenBgpdFormat)),
            ConfigFormat::Bird1V4 => ("bird1v4.conf", Box::new(Bird1Format::v4())),
            ConfigFormat::Bird1V6 => ("bird1v6.conf", Box::new(Bird1Format::v6())),
            ConfigFormat::Bird2 => ("bird2.conf", Box::new(Bird2Format)),
        };
        let path = output_dir.join(name);
        let file = std::fs::File::create(&path)?;
        let mut buf = io::BufWriter::new(file);
        write_vrps(writer.as_ref(), store, metrics, &mut buf)?;
    }
    Ok(())
}

//------------ Csv ----------------------------------------------------------

pub struct CsvFormat;

impl OutputFormat for CsvFormat {
    fn header(&self, _metrics: &Metrics, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(out, "ASN,IP Prefix,Max Length,Trust Anchor")
    }

    fn entry(&self, vrp: &Vrp, _first: bool, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(
            out,
            "AS{},{}/{},{},{}",
            vrp.key.as_id,
            addr_to_ip(vrp.key.afi, vrp.key.addr),
            vrp.key.prefix_len,
            vrp.key.max_length,
            vrp.tal,
        )
    }
}

//------------ Json -----------------------------------------------------------

pub struct JsonFormat;

impl OutputFormat for JsonFormat {
    fn header(&self, _metrics: &Metrics, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(out, "{{\n  \"roas\": [")
    }

    fn entry(&self, vrp: &Vrp, first: bool, out: &mut dyn io::Write) -> io::Result<()> {
        if !first {
            writeln!(out, ",")?;
        }
        write!(
            out,
            "    {{ \"asn\": \"AS{}\", \"prefix\": \"{}/{}\", \
            \"maxLength\": {}, \"ta\": \"{}\" }}",
            vrp.key.as_id,
            addr_to_ip(vrp.key.afi, vrp.key.addr),
            vrp.key.prefix_len,
            vrp.key.max_length,
            vrp.tal,
        )
    }

    fn footer(&self, _metrics: &Metrics, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(out, "\n  ]\n}}")
    }
}

//------------ OpenBgpd -------------------------------------------------------

pub struct OpenBgpdFormat;

impl OutputFormat for OpenBgpdFormat {
    fn header(&self, _metrics: &Metrics, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(out, "roa-set {{")
    }

    fn entry(&self, vrp: &Vrp, _first: bool, out: &mut dyn io::Write) -> io::Result<()> {
        write!(
            out,
            "    {}/{}",
            addr_to_ip(vrp.key.afi, vrp.key.addr),
            vrp.key.prefix_len,
        )?;
        if vrp.key.prefix_len < vrp.key.max_length {
            write!(out, " maxlen {}", vrp.key.max_length)?;
        }
        writeln!(out, " source-as {}", vrp.key.as_id)
    }

    fn footer(&self, _metrics: &Metrics, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(out, "}}")
    }
}

//------------ Bird1 (v4/v6 split tables) -------------------------------------

pub struct Bird1Format {
    afi: Afi,
}

impl Bird1Format {
    pub fn v4() -> Self {
        Bird1Format { afi: Afi::Ipv4 }
    }

    pub fn v6() -> Self {
        Bird1Format { afi: Afi::Ipv6 }
    }
}

impl OutputFormat for Bird1Format {
    fn wants(&self, vrp: &Vrp) -> bool {
        vrp.key.afi == self.afi
    }

    fn entry(&self, vrp: &Vrp, _first: bool, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(
            out,
            "roa {}/{} max {} as {};",
            addr_to_ip(vrp.key.afi, vrp.key.addr),
            vrp.key.prefix_len,
            vrp.key.max_length,
            vrp.key.as_id,
        )
    }
}

//------------ Bird2 -----------------------------------------------------------

pub struct Bird2Format;

impl OutputFormat for Bird2Format {
    fn entry(&self, vrp: &Vrp, _first: bool, out: &mut dyn io::Write) -> io::Result<()> {
        writeln!(
            out,
            "route {}/{} max {} as {};",
            addr_to_ip(vrp.key.afi, vrp.key.addr),
            vrp.key.prefix_len,
            vrp.key.max_length,
            vrp.key.as_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use crate::store::VrpKey;
    use std::net::Ipv4Addr;

    fn addr(a: Ipv4Addr) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..4].copy_from_slice(&a.octets());
        out
    }

    fn sample_store() -> VrpStore {
        let mut store = VrpStore::new();
        let mut total = 0;
        let mut unique = 0;
        store.roa_insert_vrps(
            64500,
            [(Afi::Ipv4, addr(Ipv4Addr::new(10, 0, 0, 0)), 8, 24)],
            "example",
            Utc.timestamp(2_000_000_000, 0),
            &mut total,
            &mut unique,
        );
        store
    }

    #[test]
    fn csv_output_has_header_and_one_row() {
        let store = sample_store();
        let mut buf = Vec::new();
        write_vrps(&CsvFormat, &store, &Metrics::new(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), "ASN,IP Prefix,Max Length,Trust Anchor");
        assert_eq!(lines.next().unwrap(), "AS64500,10.0.0.0/8,24,example");
    }

    #[test]
    fn json_output_is_well_formed() {
        let store = sample_store();
        let mut buf = Vec::new();
        write_vrps(&JsonFormat, &store, &Metrics::new(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("\"asn\": \"AS64500\""));
        assert!(text.starts_with("{\n  \"roas\": [\n"));
        assert!(text.trim_end().ends_with(']'));
    }

    #[test]
    fn openbgpd_omits_maxlen_when_equal_to_prefix_len() {
        let mut store = VrpStore::new();
        let mut total = 0;
        let mut unique = 0;
        store.roa_insert_vrps(
            64500,
            [(Afi::Ipv4, addr(Ipv4Addr::new(10, 0, 0, 0)), 8, 8)],
            "example",
            Utc.timestamp(2_000_000_000, 0),
            &mut total,
            &mut unique,
        );
        let mut buf = Vec::new();
        write_vrps(&OpenBgpdFormat, &store, &Metrics::new(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("10.0.0.0/8 source-as 64500"));
        assert!(!text.contains("maxlen"));
    }

    #[test]
    fn bird1_split_excludes_other_family() {
        let store = sample_store();
        let mut buf = Vec::new();
        write_vrps(&Bird1Format::v6(), &store, &Metrics::new(), &mut buf).unwrap();
        assert!(buf.is_empty());

        let mut buf = Vec::new();
        write_vrps(&Bird1Format::v4(), &store, &Metrics::new(), &mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "roa 10.0.0.0/8 max 24 as 64500;\n"
        );
    }

    #[test]
    fn bird2_route_table_entry() {
        let store = sample_store();
        let mut buf = Vec::new();
        write_vrps(&Bird2Format, &store, &Metrics::new(), &mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "route 10.0.0.0/8 max 24 as 64500;\n"
        );
    }
}
