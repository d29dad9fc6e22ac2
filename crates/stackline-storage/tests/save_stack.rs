//! Save/readback through the public entry point.

use stackline_core::{SaveFormat, SaveInfo, StackShape};
use stackline_storage::{save_stack, RawWriter, StackSidecar};
use tempfile::TempDir;

#[test]
fn raw_save_is_readable() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("stack_0001.raw");
    let shape = StackShape::new(4, 8, 8);
    let stack: Vec<u16> = (0..shape.len()).map(|i| (i % 4096) as u16).collect();

    let saved = save_stack(&stack, shape, 12, &SaveInfo::raw(&path)).unwrap();
    assert_eq!(saved.data, vec![path.clone()]);
    assert_eq!(saved.sidecar, StackSidecar::path_for(&path));

    let (sidecar, readback) = RawWriter::read_stack(&path).unwrap();
    assert_eq!(sidecar.shape(), shape);
    assert_eq!(sidecar.sequence, 12);
    assert_eq!(sidecar.format, SaveFormat::Raw);
    assert_eq!(readback, stack);
}

#[test]
fn missing_directory_fails() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("no_such_dir").join("stack.raw");
    let shape = StackShape::new(1, 2, 2);

    let result = save_stack(&[1, 2, 3, 4], shape, 0, &SaveInfo::raw(&path));
    assert!(result.is_err());
    assert!(!StackSidecar::path_for(&path).exists());
}

#[cfg(not(feature = "storage_tiff"))]
#[test]
fn tiff_requires_feature() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("stack.tiff");
    let err = save_stack(
        &[0; 4],
        StackShape::new(1, 2, 2),
        0,
        &SaveInfo::new(&path, SaveFormat::Tiff),
    )
    .unwrap_err();
    assert!(err.to_string().contains("storage_tiff"));
}

#[cfg(feature = "storage_tiff")]
#[test]
fn tiff_save_writes_frames_and_sidecar() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("stack.tiff");
    let shape = StackShape::new(2, 4, 4);

    let saved = save_stack(
        &vec![100; shape.len()],
        shape,
        3,
        &SaveInfo::new(&path, SaveFormat::Tiff),
    )
    .unwrap();
    assert_eq!(saved.data.len(), 2);
    assert!(saved.data.iter().all(|p| p.exists()));
    assert_eq!(StackSidecar::read(&saved.sidecar).unwrap().format, SaveFormat::Tiff);
}
