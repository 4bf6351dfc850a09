pub mod download;
pub mod ping;
pub mod upload;

#[cfg(test)]
pub(crate) mod test_server;

use std::fmt;

const MIB: f64 = 1_048_576.0;

/// Which loop, if any, is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasurementKind {
    Download,
    Upload,
    Ping,
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MeasurementKind::Download => "download",
            MeasurementKind::Upload => "upload",
            MeasurementKind::Ping => "ping",
        };
        f.write_str(name)
    }
}

/// Throughput in MB/s, where one MB is 1,048,576 bytes.
pub fn mb_per_sec(bytes: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        return 0.0;
    }
    bytes as f64 / (elapsed_secs * MIB)
}
