use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use cur_core::error::{CostError, Result};
use cur_core::settings::Settings;
use flate2::read::MultiGzDecoder;
use tracing::debug;

/// Open the report named in `settings` as a byte stream.
///
/// `-` reads stdin. Paths ending in `.gz` are decompressed on the fly.
pub fn open_report(settings: &Settings) -> Result<Box<dyn Read>> {
    if settings.reads_stdin() {
        debug!("Reading report from stdin");
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    open_path(&settings.report)
}

pub fn open_path(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path).map_err(|source| CostError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = BufReader::new(file);

    if is_gzip(path) {
        debug!("Reading gzip report {}", path.display());
        Ok(Box::new(MultiGzDecoder::new(reader)))
    } else {
        debug!("Reading report {}", path.display());
        Ok(Box::new(reader))
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}
