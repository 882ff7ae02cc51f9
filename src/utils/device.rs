//! Device and data type utilities.

use candle_core::{DType, Device};

/// Get the best available device (CUDA > Metal > CPU)
pub fn get_device(device_id: Option<usize>) -> crate::Result<Device> {
    #[cfg(feature = "cuda")]
    {
        let id = device_id.unwrap_or(0);
        match Device::new_cuda(id) {
            Ok(device) => {
                tracing::info!("Using CUDA device {}", id);
                return Ok(device);
            }
            Err(e) => {
                tracing::warn!("CUDA not available: {}", e);
            }
        }
    }

    #[cfg(feature = "metal")]
    {
        match Device::new_metal(device_id.unwrap_or(0)) {
            Ok(device) => {
                tracing::info!("Using Metal device");
                return Ok(device);
            }
            Err(e) => {
                tracing::warn!("Metal not available: {}", e);
            }
        }
    }

    let _ = device_id;
    tracing::debug!("Using CPU device");
    Ok(Device::Cpu)
}

/// Parse a device string such as `cpu`, `cuda:1`, `metal` or `auto`
pub fn parse_device(device_str: &str) -> crate::Result<Device> {
    let device_str = device_str.trim().to_lowercase();

    let (kind, ordinal) = match device_str.split_once(':') {
        Some((kind, ordinal)) => {
            let ordinal = ordinal.parse::<usize>().map_err(|_| {
                crate::FluxFillError::Config(format!("Invalid device ordinal in '{}'", device_str))
            })?;
            (kind, Some(ordinal))
        }
        None => (device_str.as_str(), None),
    };

    match kind {
        "cpu" => Ok(Device::Cpu),
        "cuda" => Ok(Device::new_cuda(ordinal.unwrap_or(0))?),
        "metal" => Ok(Device::new_metal(ordinal.unwrap_or(0))?),
        "auto" => get_device(ordinal),
        other => Err(crate::FluxFillError::Config(format!(
            "Unknown device '{}'",
            other
        ))),
    }
}

/// Human-readable dtype name for log lines
pub fn dtype_name(dtype: DType) -> &'static str {
    dtype.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu() {
        assert!(parse_device("cpu").unwrap().is_cpu());
        assert!(parse_device(" CPU ").unwrap().is_cpu());
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_device("tpu").is_err());
        assert!(parse_device("cuda:first").is_err());
    }
}
