use std::io::{BufReader, Read};
use std::iter;
use std::path::Path;

use base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD};
use flate2::bufread::GzDecoder;
use fs_err::File;
use indoc::{formatdoc, indoc};
use insta::assert_snapshot;
use itertools::Itertools;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use quill_configuration::{ConfigSettingEntry, ConfigSettings};
use quill_distribution_filename::{SourceDistFilename, WheelFilename};
use quill_fs::{Simplified, relative_to};

use super::*;

const MOCK_QUILL_VERSION: &str = "1.0.0+test";

fn format_err(err: &Error) -> String {
    let context = iter::successors(std::error::Error::source(&err), |&err| err.source())
        .map(|err| format!("  Caused by: {err}"))
        .join("\n");
    err.to_string() + "\n" + &context
}

/// Create the files of a project, with the parent directories.
fn write_project(root: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let path = root.join(path);
        fs_err::create_dir_all(path.parent().unwrap()).unwrap();
        fs_err::write(path, content).unwrap();
    }
}

/// File listings, generated archives and archive contents for both a build with
/// source tree -> wheel
/// and a build with
/// source tree -> source dist -> wheel.
#[derive(Debug, PartialEq, Eq)]
struct BuildResults {
    source_dist_list_files: FileList,
    source_dist_filename: SourceDistFilename,
    source_dist_contents: Vec<String>,
    wheel_list_files: FileList,
    wheel_filename: WheelFilename,
    wheel_contents: Vec<String>,
}

/// Run both a direct wheel build and an indirect wheel build through a source distribution,
/// while checking that directly built wheel and indirectly built wheel are the same.
fn build(source_root: &Path, dist: &Path) -> Result<BuildResults, Error> {
    // Build a direct wheel, capture all its properties to compare it with the indirect wheel
    // later and remove it since it has the same filename as the indirect wheel.
    let (_name, wheel_list_files) = list_wheel(source_root, MOCK_QUILL_VERSION)?;
    let direct_wheel_filename = build_wheel(source_root, dist, None, MOCK_QUILL_VERSION)?;
    let direct_wheel_path = dist.join(direct_wheel_filename.to_string());
    let direct_wheel_contents = wheel_contents(&direct_wheel_path);
    let direct_wheel_hash = Sha256::digest(fs_err::read(&direct_wheel_path)?);
    fs_err::remove_file(&direct_wheel_path)?;

    // Build a source distribution.
    let (_name, source_dist_list_files) = list_source_dist(source_root)?;
    let source_dist_filename = build_source_dist(source_root, dist)?;
    let source_dist_path = dist.join(source_dist_filename.to_string());
    let source_dist_contents = sdist_contents(&source_dist_path);

    // Unpack the source distribution and build a wheel from it.
    let sdist_tree = TempDir::new()?;
    let sdist_reader = BufReader::new(File::open(&source_dist_path)?);
    let mut source_dist = tar::Archive::new(GzDecoder::new(sdist_reader));
    source_dist.unpack(sdist_tree.path())?;
    let sdist_top_level_directory = sdist_tree
        .path()
        .join(source_dist_filename.top_level_directory());
    let wheel_filename = build_wheel(&sdist_top_level_directory, dist, None, MOCK_QUILL_VERSION)?;
    let wheel_contents = wheel_contents(&dist.join(wheel_filename.to_string()));

    // Check that direct and indirect wheels are identical.
    assert_eq!(direct_wheel_filename, wheel_filename);
    assert_eq!(direct_wheel_contents, wheel_contents);
    assert_eq!(
        direct_wheel_hash,
        Sha256::digest(fs_err::read(dist.join(wheel_filename.to_string()))?)
    );

    Ok(BuildResults {
        source_dist_list_files,
        source_dist_filename,
        source_dist_contents,
        wheel_list_files,
        wheel_filename,
        wheel_contents,
    })
}

fn build_err(source_root: &Path) -> String {
    let dist = TempDir::new().unwrap();
    let build_err = build(source_root, dist.path()).unwrap_err();
    format_err(&build_err)
        .replace(&source_root.user_display().to_string(), "[TEMP_PATH]")
        .replace('\\', "/")
}

/// The entries of a source distribution, sorted, with a trailing slash on directories.
fn sdist_contents(source_dist_path: &Path) -> Vec<String> {
    let sdist_reader = BufReader::new(File::open(source_dist_path).unwrap());
    let mut source_dist = tar::Archive::new(GzDecoder::new(sdist_reader));
    let mut source_dist_contents: Vec<_> = source_dist
        .entries()
        .unwrap()
        .map(|entry| {
            let entry = entry.unwrap();
            let path = entry
                .path()
                .unwrap()
                .to_str()
                .unwrap()
                .replace('\\', "/");
            let path = path.trim_end_matches('/');
            if entry.header().entry_type().is_dir() {
                format!("{path}/")
            } else {
                path.to_string()
            }
        })
        .collect();
    source_dist_contents.sort();
    source_dist_contents
}

fn wheel_contents(wheel_path: &Path) -> Vec<String> {
    let wheel = zip::ZipArchive::new(File::open(wheel_path).unwrap()).unwrap();
    let mut wheel_contents: Vec<_> = wheel
        .file_names()
        .map(|path| path.replace('\\', "/"))
        .collect();
    wheel_contents.sort_unstable();
    wheel_contents
}

fn read_wheel_file(wheel_path: &Path, name: &str) -> String {
    let mut wheel = zip::ZipArchive::new(File::open(wheel_path).unwrap()).unwrap();
    let mut contents = String::new();
    wheel
        .by_name(name)
        .unwrap()
        .read_to_string(&mut contents)
        .unwrap();
    contents
}

fn format_file_list(file_list: FileList, src: &Path) -> String {
    file_list
        .into_iter()
        .map(|(path, source)| {
            let path = path.replace('\\', "/");
            if let Some(source) = source {
                let source = relative_to(source, src)
                    .unwrap()
                    .portable_display()
                    .to_string();
                format!("{path} ({source})")
            } else {
                format!("{path} (generated)")
            }
        })
        .join("\n")
}

/// A package with a readme, a license file, entry points, optional dependencies and additional
/// source dist includes.
fn built_by_quill(root: &Path) {
    write_project(
        root,
        &[
            (
                "pyproject.toml",
                indoc! {r#"
                    [project]
                    name = "built-by-quill"
                    version = "0.1.0"
                    description = "A package to be built with quill"
                    readme = "README.md"
                    requires-python = ">=3.12"
                    license = "MIT"
                    license-files = ["LICENSE-MIT"]
                    dependencies = ["anyio>=4,<5"]

                    [project.optional-dependencies]
                    cli = ["rich>=13", "colorama ; sys_platform == 'win32'"]

                    [project.scripts]
                    say-hi = "built_by_quill.cli:hello"

                    [build-system]
                    requires = ["quill>=0.1,<0.2"]
                    build-backend = "quill"

                    [tool.quill]
                    source-include = ["tests"]
                "#},
            ),
            ("README.md", "# built-by-quill\n\nA sample package.\n"),
            ("LICENSE-MIT", "MIT License\n"),
            (
                "src/built_by_quill/__init__.py",
                "def greet():\n    return \"Hello 👋\"\n",
            ),
            (
                "src/built_by_quill/cli.py",
                "from built_by_quill import greet\n\n\ndef hello():\n    print(greet())\n",
            ),
            ("src/built_by_quill/__pycache__/cli.cpython-312.pyc", "bytecode"),
            ("tests/test_cli.py", "def test_cli():\n    pass\n"),
            ("tests/__pycache__/test_cli.cpython-312.pyc", "bytecode"),
            ("notes.txt", "Not included\n"),
        ],
    );
}

/// Tests that builds are stable and include the right files.
///
/// Tests that both source tree -> source dist -> wheel and source tree -> wheel include the
/// right files and that both wheels are byte-by-byte identical.
#[test]
fn built_by_quill_building() {
    let src = TempDir::new().unwrap();
    built_by_quill(src.path());

    let dist = TempDir::new().unwrap();
    let build = build(src.path(), dist.path()).unwrap();

    assert_eq!(
        build.source_dist_filename.to_string(),
        "built_by_quill-0.1.0.tar.gz"
    );
    // Check both the files we report and the actual files
    assert_snapshot!(format_file_list(build.source_dist_list_files, src.path()), @r"
    built_by_quill-0.1.0/PKG-INFO (generated)
    built_by_quill-0.1.0/LICENSE-MIT (LICENSE-MIT)
    built_by_quill-0.1.0/README.md (README.md)
    built_by_quill-0.1.0/pyproject.toml (pyproject.toml)
    built_by_quill-0.1.0/src/built_by_quill/__init__.py (src/built_by_quill/__init__.py)
    built_by_quill-0.1.0/src/built_by_quill/cli.py (src/built_by_quill/cli.py)
    built_by_quill-0.1.0/tests/test_cli.py (tests/test_cli.py)
    ");
    assert_snapshot!(build.source_dist_contents.iter().join("\n"), @r"
    built_by_quill-0.1.0/
    built_by_quill-0.1.0/LICENSE-MIT
    built_by_quill-0.1.0/PKG-INFO
    built_by_quill-0.1.0/README.md
    built_by_quill-0.1.0/pyproject.toml
    built_by_quill-0.1.0/src/
    built_by_quill-0.1.0/src/built_by_quill/
    built_by_quill-0.1.0/src/built_by_quill/__init__.py
    built_by_quill-0.1.0/src/built_by_quill/cli.py
    built_by_quill-0.1.0/tests/
    built_by_quill-0.1.0/tests/test_cli.py
    ");

    assert_eq!(
        build.wheel_filename.to_string(),
        "built_by_quill-0.1.0-py3-none-any.whl"
    );
    assert_snapshot!(build.wheel_contents.join("\n"), @r"
    built_by_quill-0.1.0.dist-info/METADATA
    built_by_quill-0.1.0.dist-info/RECORD
    built_by_quill-0.1.0.dist-info/WHEEL
    built_by_quill-0.1.0.dist-info/entry_points.txt
    built_by_quill-0.1.0.dist-info/licenses/LICENSE-MIT
    built_by_quill/__init__.py
    built_by_quill/cli.py
    ");
    assert_snapshot!(format_file_list(build.wheel_list_files, src.path()), @r"
    built_by_quill/__init__.py (src/built_by_quill/__init__.py)
    built_by_quill/cli.py (src/built_by_quill/cli.py)
    built_by_quill-0.1.0.dist-info/METADATA (generated)
    built_by_quill-0.1.0.dist-info/WHEEL (generated)
    built_by_quill-0.1.0.dist-info/entry_points.txt (generated)
    built_by_quill-0.1.0.dist-info/licenses/LICENSE-MIT (LICENSE-MIT)
    ");

    let wheel_path = dist.path().join(build.wheel_filename.to_string());
    assert_snapshot!(read_wheel_file(&wheel_path, "built_by_quill-0.1.0.dist-info/METADATA"), @r#"
    Metadata-Version: 2.4
    Name: built-by-quill
    Version: 0.1.0
    Summary: A package to be built with quill
    License-Expression: MIT
    License-File: LICENSE-MIT
    Requires-Dist: anyio>=4,<5
    Requires-Dist: rich>=13 ; extra == "cli"
    Requires-Dist: colorama ; extra == "cli" and (sys_platform == 'win32')
    Requires-Python: >=3.12
    Provides-Extra: cli
    Description-Content-Type: text/markdown

    # built-by-quill

    A sample package.
    "#);
    assert_snapshot!(read_wheel_file(&wheel_path, "built_by_quill-0.1.0.dist-info/WHEEL"), @r"
    Wheel-Version: 1.0
    Generator: quill 1.0.0+test
    Root-Is-Purelib: true
    Tag: py3-none-any
    ");
    assert_snapshot!(read_wheel_file(&wheel_path, "built_by_quill-0.1.0.dist-info/entry_points.txt"), @r"
    [console_scripts]
    say-hi = built_by_quill.cli:hello
    ");

    // The source dist carries the same metadata as `PKG-INFO`.
    let sdist_tree = TempDir::new().unwrap();
    let sdist_reader = BufReader::new(
        File::open(dist.path().join(build.source_dist_filename.to_string())).unwrap(),
    );
    tar::Archive::new(GzDecoder::new(sdist_reader))
        .unpack(sdist_tree.path())
        .unwrap();
    let pkg_info =
        fs_err::read_to_string(sdist_tree.path().join("built_by_quill-0.1.0/PKG-INFO")).unwrap();
    assert_eq!(
        pkg_info,
        read_wheel_file(&wheel_path, "built_by_quill-0.1.0.dist-info/METADATA")
    );
}

/// Every archive member except `RECORD` is listed with its hash and size, and `RECORD` lists
/// itself last without either.
#[test]
fn record_matches_archive() {
    let src = TempDir::new().unwrap();
    built_by_quill(src.path());
    let dist = TempDir::new().unwrap();
    let filename = build_wheel(src.path(), dist.path(), None, MOCK_QUILL_VERSION).unwrap();
    let wheel_path = dist.path().join(filename.to_string());

    let record = read_wheel_file(&wheel_path, "built_by_quill-0.1.0.dist-info/RECORD");
    let lines: Vec<&str> = record.lines().collect();
    assert_eq!(
        lines.last().copied(),
        Some("built_by_quill-0.1.0.dist-info/RECORD,,")
    );

    let mut wheel = zip::ZipArchive::new(File::open(&wheel_path).unwrap()).unwrap();
    let mut listed = Vec::new();
    for line in &lines[..lines.len() - 1] {
        let parts: Vec<&str> = line.split(',').collect();
        let [path, hash, size] = parts.as_slice() else {
            panic!("Invalid RECORD line: {line}");
        };
        let mut contents = Vec::new();
        wheel
            .by_name(path)
            .unwrap()
            .read_to_end(&mut contents)
            .unwrap();
        assert_eq!(
            *hash,
            format!(
                "sha256={}",
                BASE64_URL_SAFE_NO_PAD.encode(Sha256::digest(&contents))
            )
        );
        assert_eq!(*size, contents.len().to_string());
        listed.push(path.to_string());
    }
    listed.push("built_by_quill-0.1.0.dist-info/RECORD".to_string());
    listed.sort();
    assert_eq!(listed, wheel_contents(&wheel_path));

    // The members are in build order, with `RECORD` last.
    let names: Vec<&str> = wheel.file_names().collect();
    assert_eq!(names.len(), lines.len());
    assert_snapshot!(record.lines().map(|line| line.split(',').next().unwrap()).join("\n"), @r"
    built_by_quill/__init__.py
    built_by_quill/cli.py
    built_by_quill-0.1.0.dist-info/METADATA
    built_by_quill-0.1.0.dist-info/WHEEL
    built_by_quill-0.1.0.dist-info/entry_points.txt
    built_by_quill-0.1.0.dist-info/licenses/LICENSE-MIT
    built_by_quill-0.1.0.dist-info/RECORD
    ");
}

/// Two builds from the same inputs are byte-identical, for both archive formats.
#[test]
fn reproducible() {
    let src = TempDir::new().unwrap();
    built_by_quill(src.path());

    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let mut archives = Vec::new();
    for dist in [first.path(), second.path()] {
        let wheel = build_wheel(src.path(), dist, None, MOCK_QUILL_VERSION).unwrap();
        let sdist = build_source_dist(src.path(), dist).unwrap();
        archives.push((
            fs_err::read(dist.join(wheel.to_string())).unwrap(),
            fs_err::read(dist.join(sdist.to_string())).unwrap(),
        ));
    }
    assert!(archives[0] == archives[1]);
}

fn sample(root: &Path, requires_python: Option<&str>) {
    let requires_python = requires_python
        .map(|requires_python| format!("requires-python = \"{requires_python}\"\n"))
        .unwrap_or_default();
    let pyproject_toml = formatdoc! {r#"
        [project]
        name = "sample"
        version = "1.0"
        {requires_python}
        [build-system]
        requires = ["quill>=0.1,<0.2"]
        build-backend = "quill"
    "#};
    write_project(
        root,
        &[
            ("pyproject.toml", &pyproject_toml),
            ("sample.py", "print(\"Hello 👋\")\n"),
        ],
    );
}

#[test]
fn single_file_python3_only() {
    let src = TempDir::new().unwrap();
    sample(src.path(), Some(">=3.6"));
    let dist = TempDir::new().unwrap();
    let build = build(src.path(), dist.path()).unwrap();

    assert_eq!(build.wheel_filename.to_string(), "sample-1.0-py3-none-any.whl");
    assert_snapshot!(build.wheel_contents.join("\n"), @r"
    sample-1.0.dist-info/METADATA
    sample-1.0.dist-info/RECORD
    sample-1.0.dist-info/WHEEL
    sample.py
    ");
    assert_snapshot!(build.source_dist_contents.join("\n"), @r"
    sample-1.0/
    sample-1.0/PKG-INFO
    sample-1.0/pyproject.toml
    sample-1.0/sample.py
    ");

    let wheel_path = dist.path().join(build.wheel_filename.to_string());
    let record = read_wheel_file(&wheel_path, "sample-1.0.dist-info/RECORD");
    assert_eq!(record.lines().count(), 4);
    assert!(record.ends_with("sample-1.0.dist-info/RECORD,,\n"));
}

#[test]
fn single_file_python2_compatible() {
    let src = TempDir::new().unwrap();
    sample(src.path(), None);
    let dist = TempDir::new().unwrap();
    let build = build(src.path(), dist.path()).unwrap();

    assert_eq!(
        build.wheel_filename.to_string(),
        "sample-1.0-py2.py3-none-any.whl"
    );
    let wheel_path = dist.path().join(build.wheel_filename.to_string());
    assert_snapshot!(read_wheel_file(&wheel_path, "sample-1.0.dist-info/WHEEL"), @r"
    Wheel-Version: 1.0
    Generator: quill 1.0.0+test
    Root-Is-Purelib: true
    Tag: py2-none-any
    Tag: py3-none-any
    ");
}

/// The metadata of the prepare step and of the wheel are identical.
#[test]
fn prepare_metadata_then_build_wheel() {
    let src = TempDir::new().unwrap();
    built_by_quill(src.path());

    let metadata_dir = TempDir::new().unwrap();
    let dist_info_dir = metadata(src.path(), metadata_dir.path(), MOCK_QUILL_VERSION).unwrap();
    assert_eq!(dist_info_dir, "built_by_quill-0.1.0.dist-info");

    let mut prepared: Vec<_> = walkdir::WalkDir::new(metadata_dir.path().join(&dist_info_dir))
        .sort_by_file_name()
        .into_iter()
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            relative_to(entry.path(), metadata_dir.path())
                .unwrap()
                .portable_display()
                .to_string()
        })
        .collect();
    prepared.sort();
    // No `RECORD` in the prepared directory.
    assert_snapshot!(prepared.join("\n"), @r"
    built_by_quill-0.1.0.dist-info/METADATA
    built_by_quill-0.1.0.dist-info/WHEEL
    built_by_quill-0.1.0.dist-info/entry_points.txt
    built_by_quill-0.1.0.dist-info/licenses/LICENSE-MIT
    ");

    // Both the metadata directory itself and the dist-info directory are accepted.
    for metadata_directory in [
        metadata_dir.path().to_path_buf(),
        metadata_dir.path().join(&dist_info_dir),
    ] {
        let output_dir = TempDir::new().unwrap();
        let filename = build_wheel(
            src.path(),
            output_dir.path(),
            Some(&metadata_directory),
            MOCK_QUILL_VERSION,
        )
        .unwrap();
        let wheel_path = output_dir.path().join(filename.to_string());
        for file in ["METADATA", "WHEEL", "entry_points.txt"] {
            let prepared =
                fs_err::read_to_string(metadata_dir.path().join(&dist_info_dir).join(file))
                    .unwrap();
            assert_eq!(
                prepared,
                read_wheel_file(&wheel_path, &format!("{dist_info_dir}/{file}"))
            );
        }
    }
}

#[test]
fn prepare_metadata_twice() {
    let src = TempDir::new().unwrap();
    sample(src.path(), Some(">=3.6"));
    let metadata_dir = TempDir::new().unwrap();
    metadata(src.path(), metadata_dir.path(), MOCK_QUILL_VERSION).unwrap();
    let err = metadata(src.path(), metadata_dir.path(), MOCK_QUILL_VERSION).unwrap_err();
    assert!(
        matches!(&err, Error::DestinationExists(path) if path.ends_with("sample-1.0.dist-info")),
        "{err:?}"
    );
}

/// A failed prepare step doesn't leave a partial dist-info directory behind.
#[test]
fn prepare_metadata_cleanup() {
    let src = TempDir::new().unwrap();
    sample(src.path(), Some(">=3.6"));
    let pyproject_toml = fs_err::read_to_string(src.path().join("pyproject.toml")).unwrap();
    fs_err::write(
        src.path().join("pyproject.toml"),
        pyproject_toml.replace(
            "version = \"1.0\"",
            "version = \"1.0\"\nlicense-files = [\"LICENSE\"]",
        ),
    )
    .unwrap();

    let metadata_dir = TempDir::new().unwrap();
    let err = metadata(src.path(), metadata_dir.path(), MOCK_QUILL_VERSION).unwrap_err();
    assert_snapshot!(format_err(&err), @"The file declared in `project.license-files` does not exist: LICENSE");
    assert!(!metadata_dir.path().join("sample-1.0.dist-info").exists());
}

#[test]
fn wheel_not_overwritten() {
    let src = TempDir::new().unwrap();
    sample(src.path(), Some(">=3.6"));
    let dist = TempDir::new().unwrap();
    let filename = build_wheel(src.path(), dist.path(), None, MOCK_QUILL_VERSION).unwrap();
    let wheel_path = dist.path().join(filename.to_string());
    let before = fs_err::read(&wheel_path).unwrap();

    // Modify the module, the existing wheel must not change.
    fs_err::write(src.path().join("sample.py"), "print(\"Bye\")\n").unwrap();
    let err = build_wheel(src.path(), dist.path(), None, MOCK_QUILL_VERSION).unwrap_err();
    assert!(matches!(err, Error::DestinationExists(_)), "{err:?}");
    assert_eq!(fs_err::read(&wheel_path).unwrap(), before);

    // No temporary files are left behind.
    assert_eq!(fs_err::read_dir(dist.path()).unwrap().count(), 1);
}

#[test]
fn source_dist_overwritten() {
    let src = TempDir::new().unwrap();
    sample(src.path(), Some(">=3.6"));
    let dist = TempDir::new().unwrap();
    build_source_dist(src.path(), dist.path()).unwrap();
    build_source_dist(src.path(), dist.path()).unwrap();
    assert_eq!(fs_err::read_dir(dist.path()).unwrap().count(), 1);
}

#[test]
fn inconsistent_steps() {
    let src = TempDir::new().unwrap();
    sample(src.path(), Some(">=3.6"));
    let metadata_dir = TempDir::new().unwrap();
    metadata(src.path(), metadata_dir.path(), MOCK_QUILL_VERSION).unwrap();

    // The declarations change between the two steps.
    let pyproject_toml = fs_err::read_to_string(src.path().join("pyproject.toml")).unwrap();
    fs_err::write(
        src.path().join("pyproject.toml"),
        pyproject_toml.replace(
            "version = \"1.0\"",
            "version = \"1.0\"\ndescription = \"Changed\"",
        ),
    )
    .unwrap();

    let dist = TempDir::new().unwrap();
    let err = build_wheel(
        src.path(),
        dist.path(),
        Some(metadata_dir.path()),
        MOCK_QUILL_VERSION,
    )
    .unwrap_err();
    assert_snapshot!(format_err(&err), @"Inconsistent metadata between prepare and build step: METADATA");
    assert_eq!(fs_err::read_dir(dist.path()).unwrap().count(), 0);

    // A different generator version is an inconsistency too.
    fs_err::write(src.path().join("pyproject.toml"), pyproject_toml).unwrap();
    let err = build_wheel(src.path(), dist.path(), Some(metadata_dir.path()), "2.0.0").unwrap_err();
    assert_snapshot!(format_err(&err), @"Inconsistent metadata between prepare and build step: WHEEL");
}

#[test]
fn missing_readme() {
    let src = TempDir::new().unwrap();
    write_project(
        src.path(),
        &[
            (
                "pyproject.toml",
                indoc! {r#"
                    [project]
                    name = "sample"
                    version = "1.0"
                    readme = "README.md"

                    [build-system]
                    requires = ["quill>=0.1,<0.2"]
                    build-backend = "quill"
                "#},
            ),
            ("sample.py", ""),
        ],
    );
    assert_snapshot!(build_err(src.path()), @"The file declared in `project.readme` does not exist: README.md");
}

#[test]
fn license_file_pre_pep639() {
    let src = TempDir::new().unwrap();
    write_project(
        src.path(),
        &[
            (
                "pyproject.toml",
                indoc! {r#"
                    [project]
                    name = "license-test"
                    version = "1.0.0"
                    license = { file = "license.txt" }

                    [build-system]
                    requires = ["quill>=0.1,<0.2"]
                    build-backend = "quill"
                "#},
            ),
            ("license.txt", "Copyright\nAll rights reserved\n"),
            ("src/license_test/__init__.py", ""),
        ],
    );

    let dist = TempDir::new().unwrap();
    let build = build(src.path(), dist.path()).unwrap();
    assert_snapshot!(build.source_dist_contents.join("\n"), @r"
    license_test-1.0.0/
    license_test-1.0.0/PKG-INFO
    license_test-1.0.0/license.txt
    license_test-1.0.0/pyproject.toml
    license_test-1.0.0/src/
    license_test-1.0.0/src/license_test/
    license_test-1.0.0/src/license_test/__init__.py
    ");
    let wheel_path = dist.path().join(build.wheel_filename.to_string());
    assert_snapshot!(read_wheel_file(&wheel_path, "license_test-1.0.0.dist-info/METADATA"), @r"
    Metadata-Version: 2.3
    Name: license-test
    Version: 1.0.0
    License: Copyright
             All rights reserved
    ");
}

/// License globs that overlap ship each license file once, both in the prepared metadata and
/// in the wheel built from it.
#[test]
fn license_files_overlapping_globs() {
    let src = TempDir::new().unwrap();
    write_project(
        src.path(),
        &[
            (
                "pyproject.toml",
                indoc! {r#"
                    [project]
                    name = "sample"
                    version = "1.0"
                    license = "MIT OR Apache-2.0"
                    license-files = ["LICENSE", "./LICENSE", "LICEN[CS]E*"]

                    [build-system]
                    requires = ["quill>=0.1,<0.2"]
                    build-backend = "quill"
                "#},
            ),
            ("LICENSE", "MIT License\n"),
            ("LICENCE-APACHE", "Apache License\n"),
            ("sample.py", "print(\"Hello 👋\")\n"),
        ],
    );

    let metadata_dir = TempDir::new().unwrap();
    let dist_info_dir = metadata(src.path(), metadata_dir.path(), MOCK_QUILL_VERSION).unwrap();
    let dist = TempDir::new().unwrap();
    let filename = build_wheel(
        src.path(),
        dist.path(),
        Some(metadata_dir.path()),
        MOCK_QUILL_VERSION,
    )
    .unwrap();

    let wheel_path = dist.path().join(filename.to_string());
    assert_snapshot!(wheel_contents(&wheel_path).join("\n"), @r"
    sample-1.0.dist-info/METADATA
    sample-1.0.dist-info/RECORD
    sample-1.0.dist-info/WHEEL
    sample-1.0.dist-info/licenses/LICENCE-APACHE
    sample-1.0.dist-info/licenses/LICENSE
    sample.py
    ");
    let metadata = read_wheel_file(&wheel_path, &format!("{dist_info_dir}/METADATA"));
    assert_eq!(
        metadata,
        fs_err::read_to_string(metadata_dir.path().join(&dist_info_dir).join("METADATA")).unwrap()
    );
    assert_snapshot!(metadata, @r"
    Metadata-Version: 2.4
    Name: sample
    Version: 1.0
    License-Expression: MIT OR Apache-2.0
    License-File: LICENCE-APACHE
    License-File: LICENSE
    ");
}

#[test]
fn pyproject_toml_excluded() {
    let src = TempDir::new().unwrap();
    sample(src.path(), None);
    let pyproject_toml = fs_err::read_to_string(src.path().join("pyproject.toml")).unwrap();
    fs_err::write(
        src.path().join("pyproject.toml"),
        pyproject_toml + "\n[tool.quill]\nsource-exclude = [\"*.toml\"]\n",
    )
    .unwrap();
    let dist = TempDir::new().unwrap();
    let err = build_source_dist(src.path(), dist.path()).unwrap_err();
    assert_snapshot!(format_err(&err), @"`pyproject.toml` must not be excluded from source distribution build");
}

#[test]
fn wheel_exclude() {
    let src = TempDir::new().unwrap();
    write_project(
        src.path(),
        &[
            (
                "pyproject.toml",
                indoc! {r#"
                    [project]
                    name = "sample"
                    version = "1.0"

                    [build-system]
                    requires = ["quill>=0.1,<0.2"]
                    build-backend = "quill"

                    [tool.quill]
                    wheel-exclude = ["*.so", "/sample/fixtures"]
                "#},
            ),
            ("sample/__init__.py", ""),
            ("sample/_speedups.so", "binary"),
            ("sample/fixtures/data.json", "{}"),
            ("sample/nested/fixtures/data.json", "{}"),
        ],
    );
    let (_filename, files) = list_wheel(src.path(), MOCK_QUILL_VERSION).unwrap();
    assert_snapshot!(format_file_list(files, src.path()), @r"
    sample/__init__.py (sample/__init__.py)
    sample/nested/fixtures/data.json (sample/nested/fixtures/data.json)
    sample-1.0.dist-info/METADATA (generated)
    sample-1.0.dist-info/WHEEL (generated)
    ");

    // The wheel excludes don't apply to the source distribution.
    let (_filename, files) = list_source_dist(src.path()).unwrap();
    assert_snapshot!(format_file_list(files, src.path()), @r"
    sample-1.0/PKG-INFO (generated)
    sample-1.0/pyproject.toml (pyproject.toml)
    sample-1.0/sample/__init__.py (sample/__init__.py)
    sample-1.0/sample/_speedups.so (sample/_speedups.so)
    sample-1.0/sample/fixtures/data.json (sample/fixtures/data.json)
    sample-1.0/sample/nested/fixtures/data.json (sample/nested/fixtures/data.json)
    ");
}

/// Executable files keep their executable bit, other files are normalized to `0o644`.
#[cfg(unix)]
#[test]
fn executable_bit() {
    use std::os::unix::fs::PermissionsExt;

    let src = TempDir::new().unwrap();
    write_project(
        src.path(),
        &[
            (
                "pyproject.toml",
                indoc! {r#"
                    [project]
                    name = "sample"
                    version = "1.0"

                    [build-system]
                    requires = ["quill>=0.1,<0.2"]
                    build-backend = "quill"
                "#},
            ),
            ("sample/__init__.py", ""),
            ("sample/run.sh", "#!/bin/sh\necho hi\n"),
        ],
    );
    let script = src.path().join("sample/run.sh");
    let mut permissions = fs_err::metadata(&script).unwrap().permissions();
    permissions.set_mode(0o755);
    fs_err::set_permissions(&script, permissions).unwrap();

    let dist = TempDir::new().unwrap();
    let wheel = build_wheel(src.path(), dist.path(), None, MOCK_QUILL_VERSION).unwrap();
    let mut wheel =
        zip::ZipArchive::new(File::open(dist.path().join(wheel.to_string())).unwrap()).unwrap();
    let mode = |wheel: &mut zip::ZipArchive<File>, name: &str| {
        wheel.by_name(name).unwrap().unix_mode().unwrap() & 0o777
    };
    assert_eq!(mode(&mut wheel, "sample/run.sh"), 0o755);
    assert_eq!(mode(&mut wheel, "sample/__init__.py"), 0o644);

    let sdist = build_source_dist(src.path(), dist.path()).unwrap();
    let sdist_reader = BufReader::new(File::open(dist.path().join(sdist.to_string())).unwrap());
    let mut source_dist = tar::Archive::new(GzDecoder::new(sdist_reader));
    let modes: Vec<(String, u32)> = source_dist
        .entries()
        .unwrap()
        .map(|entry| {
            let entry = entry.unwrap();
            let path = entry.path().unwrap().to_str().unwrap().to_string();
            (path, entry.header().mode().unwrap())
        })
        .filter(|(path, _)| path.ends_with(".sh") || path.ends_with(".py"))
        .collect();
    assert_eq!(
        modes,
        vec![
            ("sample-1.0/sample/__init__.py".to_string(), 0o644),
            ("sample-1.0/sample/run.sh".to_string(), 0o755),
        ]
    );
}

/// Symlinks are followed both in the module and in the `source-include` walk.
#[cfg(unix)]
#[test]
fn source_include_symlinks() {
    let shared = TempDir::new().unwrap();
    write_project(
        shared.path(),
        &[("data.csv", "a,b\n"), ("fixtures/case.json", "{}\n")],
    );

    let src = TempDir::new().unwrap();
    write_project(
        src.path(),
        &[
            (
                "pyproject.toml",
                indoc! {r#"
                    [project]
                    name = "sample"
                    version = "1.0"

                    [tool.quill]
                    source-include = ["tests"]

                    [build-system]
                    requires = ["quill>=0.1,<0.2"]
                    build-backend = "quill"
                "#},
            ),
            ("sample.py", ""),
            ("tests/test_sample.py", ""),
        ],
    );
    std::os::unix::fs::symlink(
        shared.path().join("data.csv"),
        src.path().join("tests/data.csv"),
    )
    .unwrap();
    std::os::unix::fs::symlink(
        shared.path().join("fixtures"),
        src.path().join("tests/fixtures"),
    )
    .unwrap();

    let dist = TempDir::new().unwrap();
    let sdist = build_source_dist(src.path(), dist.path()).unwrap();
    assert_snapshot!(sdist_contents(&dist.path().join(sdist.to_string())).join("\n"), @r"
    sample-1.0/
    sample-1.0/PKG-INFO
    sample-1.0/pyproject.toml
    sample-1.0/sample.py
    sample-1.0/tests/
    sample-1.0/tests/data.csv
    sample-1.0/tests/fixtures/
    sample-1.0/tests/fixtures/case.json
    sample-1.0/tests/test_sample.py
    ");
}

#[test]
fn backend_hooks() {
    let src = TempDir::new().unwrap();
    built_by_quill(src.path());
    let backend = BuildBackend::new(src.path(), MOCK_QUILL_VERSION);
    let config_settings: ConfigSettings = ["editable-verbose=true"
        .parse::<ConfigSettingEntry>()
        .unwrap()]
    .into_iter()
    .collect();

    assert_eq!(
        backend.get_build_requirements(&config_settings).unwrap(),
        vec!["anyio>=4,<5".to_string()]
    );

    let out = TempDir::new().unwrap();
    let dist_info_dir = backend
        .prepare_metadata(&out.path().join("metadata"), &config_settings)
        .unwrap();
    let wheel = backend
        .build_wheel(
            &out.path().join("dist"),
            &config_settings,
            Some(&out.path().join("metadata").join(&dist_info_dir)),
        )
        .unwrap();
    let sdist = backend
        .build_sdist(&out.path().join("dist"), &ConfigSettings::default())
        .unwrap();
    assert_eq!(wheel.to_string(), "built_by_quill-0.1.0-py3-none-any.whl");
    assert_eq!(sdist.to_string(), "built_by_quill-0.1.0.tar.gz");
}

/// The declarations can be read from another file than `<root>/pyproject.toml`, which is then
/// shipped as `pyproject.toml`.
#[test]
fn backend_alternative_pyproject_toml() {
    let src = TempDir::new().unwrap();
    sample(src.path(), Some(">=3.6"));
    fs_err::rename(
        src.path().join("pyproject.toml"),
        src.path().join("release.toml"),
    )
    .unwrap();

    let backend = BuildBackend::new(src.path(), MOCK_QUILL_VERSION)
        .with_pyproject_toml(src.path().join("release.toml"));
    let dist = TempDir::new().unwrap();
    let sdist = backend
        .build_sdist(dist.path(), &ConfigSettings::default())
        .unwrap();
    let contents = sdist_contents(&dist.path().join(sdist.to_string()));
    assert!(contents.contains(&"sample-1.0/pyproject.toml".to_string()));
    assert!(!contents.iter().any(|path| path.ends_with("release.toml")));
}
