//! Anonymize command: rewrite a log with sensitive captures replaced.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use rand::Rng;
use reqlog_core::{FileFormat, TrackerRegistry};

use super::util::load_format;
use crate::Config;

/// Anonymizes `log` to stdout.
pub fn run(
    config: &Config,
    format: Option<&Path>,
    discard_teaser_lines: bool,
    log: &Path,
) -> Result<()> {
    let format = load_format(config, format, &TrackerRegistry::default())?;
    let file = File::open(log).with_context(|| format!("failed to open {}", log.display()))?;
    let stdout = io::stdout().lock();
    let written = anonymize(
        &format,
        BufReader::new(file),
        BufWriter::new(stdout),
        discard_teaser_lines || config.discard_teaser_lines,
        &mut rand::rng(),
    )?;
    tracing::debug!(lines = written, path = %log.display(), "anonymized log");
    Ok(())
}

/// Copies `reader` to `writer` line by line, anonymizing recognized lines.
/// Returns the number of lines written.
///
/// Lines are matched on a lossy UTF-8 decoding; lines left unchanged are
/// written back with their original bytes.
pub fn anonymize<R, W, G>(
    format: &FileFormat,
    mut reader: R,
    mut writer: W,
    discard_teaser_lines: bool,
    rng: &mut G,
) -> Result<u64>
where
    R: BufRead,
    W: Write,
    G: Rng + ?Sized,
{
    let mut written = 0;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader
            .read_until(b'\n', &mut buf)
            .context("failed to read log")?
            == 0
        {
            break;
        }
        let raw = strip_line_ending(&buf);
        let line = String::from_utf8_lossy(raw);
        let Some(anonymized) = format.anonymize_line(&line, discard_teaser_lines, &mut *rng)
        else {
            continue;
        };
        if anonymized == line {
            writer.write_all(raw).context("failed to write output")?;
        } else {
            writer
                .write_all(anonymized.as_bytes())
                .context("failed to write output")?;
        }
        writer.write_all(b"\n").context("failed to write output")?;
        written += 1;
    }
    writer.flush().context("failed to write output")?;
    Ok(written)
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    const RAILS_FORMAT: &str = include_str!("../../../../formats/rails.toml");

    const LOG: &str = "\
Processing UsersController#show (for 192.168.1.77 at 2024-03-01 10:15:00) [GET]
  Parameters: {\"id\"=>\"1\"}
  SQL (cached)   SELECT 1
Completed in 100ms | 200 OK [http://shop.example.com/users/1]
booting worker 3
";

    fn run_anonymize(discard: bool) -> (String, u64) {
        let format = FileFormat::from_toml_str(RAILS_FORMAT, &TrackerRegistry::default()).unwrap();
        let mut out = Vec::new();
        let written = anonymize(
            &format,
            LOG.as_bytes(),
            &mut out,
            discard,
            &mut StdRng::seed_from_u64(7),
        )
        .unwrap();
        (String::from_utf8(out).unwrap(), written)
    }

    #[test]
    fn test_sensitive_captures_are_replaced() {
        let (out, written) = run_anonymize(false);
        assert_eq!(written, 5);
        assert!(!out.contains("192.168.1.77"));
        assert!(!out.contains("shop.example.com"));
        assert!(!out.contains("\"id\""));
        assert!(out.contains("Processing UsersController#show"));
        assert!(out.contains("/users/1]"));
        assert!(out.contains("booting worker 3"));
    }

    #[test]
    fn test_teaser_only_lines_can_be_discarded() {
        let (kept, _) = run_anonymize(false);
        assert!(kept.contains("  SQL (cached)   SELECT 1"));

        let (out, written) = run_anonymize(true);
        assert_eq!(written, 4);
        assert!(!out.contains("SQL (cached)"));
        assert!(out.contains("booting worker 3"));
    }

    #[test]
    fn test_invalid_utf8_lines_pass_through() {
        let format = FileFormat::from_toml_str(RAILS_FORMAT, &TrackerRegistry::default()).unwrap();
        let log: &[u8] = b"\
Processing UsersController#show (for 192.168.1.77 at 2024-03-01 10:15:00) [GET]\r
noise \xff\xfe bytes
booting worker 3";
        let mut out = Vec::new();
        let written = anonymize(
            &format,
            log,
            &mut out,
            false,
            &mut StdRng::seed_from_u64(7),
        )
        .unwrap();
        assert_eq!(written, 3);
        assert!(out.windows(14).any(|w| w == b"noise \xff\xfe bytes"));
        assert!(out.ends_with(b"booting worker 3\n"));
        let text = String::from_utf8_lossy(&out);
        assert!(!text.contains("192.168.1.77"));
        assert!(text.starts_with("Processing UsersController#show"));
    }
}
