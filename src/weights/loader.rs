//! Safetensors loading through a memory map.

use std::collections::HashMap;
use std::path::Path;
use candle_core::{DType, Device, Tensor};
use safetensors::SafeTensors;

use crate::utils::dtype_name;

/// Load every tensor of a safetensors file onto `device`, keeping stored dtypes.
pub fn load_safetensors(
    path: impl AsRef<Path>,
    device: &Device,
) -> crate::Result<HashMap<String, Tensor>> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(crate::FluxFillError::WeightLoad(format!(
            "Weight file not found: {:?}",
            path
        )));
    }

    tracing::debug!("Loading weight file: {:?}", path);

    let file = std::fs::File::open(path)?;
    let mmap = unsafe { memmap2::Mmap::map(&file)? };

    let safetensors = SafeTensors::deserialize(&mmap)
        .map_err(|e| crate::FluxFillError::WeightLoad(format!("{:?}: {}", path, e)))?;

    let mut tensors = HashMap::new();

    for (tensor_name, tensor_view) in safetensors.tensors() {
        let tensor = load_tensor(&tensor_name, &tensor_view, device)?;
        tensors.insert(tensor_name, tensor);
    }

    Ok(tensors)
}

/// Build a single tensor from its raw view
fn load_tensor(
    name: &str,
    view: &safetensors::tensor::TensorView<'_>,
    device: &Device,
) -> crate::Result<Tensor> {
    let shape: Vec<usize> = view.shape().to_vec();
    let dtype = convert_safetensor_dtype(view.dtype()).map_err(|e| match e {
        crate::FluxFillError::UnsupportedDtype(dtype) => {
            crate::FluxFillError::UnsupportedDtype(format!("{} ({})", dtype, name))
        }
        other => other,
    })?;

    tracing::trace!("Tensor {} {:?} {}", name, shape, dtype_name(dtype));

    let tensor = Tensor::from_raw_buffer(view.data(), dtype, &shape, &Device::Cpu)?;
    let tensor = tensor.to_device(device)?;

    Ok(tensor)
}

/// Convert safetensor dtype to candle dtype.
/// Raw buffers are reinterpreted as-is, so only identical layouts are accepted.
fn convert_safetensor_dtype(dtype: safetensors::Dtype) -> crate::Result<DType> {
    match dtype {
        safetensors::Dtype::F16 => Ok(DType::F16),
        safetensors::Dtype::BF16 => Ok(DType::BF16),
        safetensors::Dtype::F32 => Ok(DType::F32),
        safetensors::Dtype::F64 => Ok(DType::F64),
        safetensors::Dtype::I64 => Ok(DType::I64),
        safetensors::Dtype::U8 => Ok(DType::U8),
        safetensors::Dtype::U32 => Ok(DType::U32),
        other => Err(crate::FluxFillError::UnsupportedDtype(format!("{:?}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dtype_conversion() {
        assert!(matches!(convert_safetensor_dtype(safetensors::Dtype::F16), Ok(DType::F16)));
        assert!(matches!(convert_safetensor_dtype(safetensors::Dtype::BF16), Ok(DType::BF16)));
        assert!(matches!(convert_safetensor_dtype(safetensors::Dtype::F32), Ok(DType::F32)));
        assert!(matches!(
            convert_safetensor_dtype(safetensors::Dtype::I16),
            Err(crate::FluxFillError::UnsupportedDtype(_))
        ));
    }

    #[test]
    fn test_load_roundtrip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.safetensors");

        let mut tensors = HashMap::new();
        tensors.insert(
            "img_in.weight".to_string(),
            Tensor::new(&[1.0f32, 2.0, 3.0], &Device::Cpu).unwrap(),
        );
        tensors.insert(
            "txt_in.bias".to_string(),
            Tensor::zeros((2, 2), DType::F16, &Device::Cpu).unwrap(),
        );
        candle_core::safetensors::save(&tensors, &path).unwrap();

        let loaded = load_safetensors(&path, &Device::Cpu).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(
            loaded["img_in.weight"].to_vec1::<f32>().unwrap(),
            vec![1.0, 2.0, 3.0]
        );
        assert_eq!(loaded["txt_in.bias"].dtype(), DType::F16);
        assert_eq!(loaded["txt_in.bias"].dims(), &[2, 2]);
    }

    #[test]
    fn test_missing_file() {
        let err = load_safetensors("/nonexistent/fill.safetensors", &Device::Cpu).unwrap_err();
        assert!(matches!(err, crate::FluxFillError::WeightLoad(_)));
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.safetensors");
        std::fs::write(&path, b"not a safetensors file").unwrap();

        let err = load_safetensors(&path, &Device::Cpu).unwrap_err();
        assert!(matches!(err, crate::FluxFillError::WeightLoad(_)));
    }
}
