use std::fs;

use toolmat_jsonl::{enumerate_inputs, NamingError};

fn touch(dir: &std::path::Path, name: &str) {
    fs::write(dir.join(name), "Tool Materials\n").unwrap();
}

#[test]
fn enumerate_inputs_sorted_with_indices() {
    let td = tempfile::tempdir().unwrap();
    for name in ["003.txt", "001.txt", "004.txt", "002.txt"] {
        touch(td.path(), name);
    }
    // not a page
    fs::write(td.path().join("notes.md"), "x").unwrap();

    let files = enumerate_inputs(td.path()).expect("should enumerate");
    let names: Vec<String> = files.iter().map(|f| f.path.file_name().unwrap().to_string_lossy().to_string()).collect();
    assert_eq!(names, vec!["001.txt", "002.txt", "003.txt", "004.txt"]);
    assert_eq!(files.iter().map(|f| f.index).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
}

#[test]
fn enumerate_inputs_gap_is_naming_error() {
    let td = tempfile::tempdir().unwrap();
    touch(td.path(), "001.txt");
    touch(td.path(), "003.txt");

    let err = enumerate_inputs(td.path()).unwrap_err();
    match err {
        NamingError::NotExpected { position, expected, found } => {
            assert_eq!(position, 2);
            assert_eq!(expected, "002");
            assert_eq!(found, "003.txt");
        }
        other => panic!("expected NotExpected, got {other:?}"),
    }
}

#[test]
fn enumerate_inputs_rejects_unpadded_names() {
    let td = tempfile::tempdir().unwrap();
    touch(td.path(), "1.txt");

    let err = enumerate_inputs(td.path()).unwrap_err();
    assert!(matches!(err, NamingError::NotExpected { position: 1, .. }));
}

#[test]
fn enumerate_inputs_missing_directory() {
    let td = tempfile::tempdir().unwrap();
    let err = enumerate_inputs(&td.path().join("nope")).unwrap_err();
    assert!(matches!(err, NamingError::MissingDirectory { .. }));
    assert!(err.to_string().starts_with("MissingDirectory"));
}

#[test]
fn enumerate_inputs_empty_directory_is_ok() {
    let td = tempfile::tempdir().unwrap();
    let files = enumerate_inputs(td.path()).unwrap();
    assert!(files.is_empty());
}
