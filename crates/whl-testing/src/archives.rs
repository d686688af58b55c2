//! Hand-built archives, including ones the packer would never produce

use anyhow::{anyhow, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tar::{Builder, EntryType, Header};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Members of [`poisoned_tar`] and [`poisoned_zip`] that must be refused
pub const POISONED_MEMBERS: &[&str] = &["../../evil.txt", "/abs/evil.txt"];

/// The member of the poisoned archives that must still be extracted
pub const SAFE_MEMBER: &str = "bundle/ok.txt";

/// Appends a regular file, writing `name` straight into the header bytes so
/// that `..` and absolute names survive
fn append_raw(builder: &mut Builder<File>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = Header::new_gnu();
    {
        let gnu = header
            .as_gnu_mut()
            .ok_or_else(|| anyhow!("not a GNU header"))?;
        let bytes = name.as_bytes();
        if bytes.len() > gnu.name.len() {
            return Err(anyhow!("member name too long: {name}"));
        }
        gnu.name[..bytes.len()].copy_from_slice(bytes);
    }
    header.set_entry_type(EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, data)?;
    Ok(())
}

/// A tar holding [`POISONED_MEMBERS`] around one [`SAFE_MEMBER`]
pub fn poisoned_tar(path: &Path) -> Result<PathBuf> {
    let mut builder = Builder::new(File::create(path)?);
    append_raw(&mut builder, POISONED_MEMBERS[0], b"escaped")?;
    append_raw(&mut builder, SAFE_MEMBER, b"fine")?;
    append_raw(&mut builder, POISONED_MEMBERS[1], b"absolute")?;
    builder.into_inner()?.flush()?;
    Ok(path.to_path_buf())
}

/// A zip holding [`POISONED_MEMBERS`] around one [`SAFE_MEMBER`]
pub fn poisoned_zip(path: &Path) -> Result<PathBuf> {
    let mut zip = ZipWriter::new(File::create(path)?);
    let options = SimpleFileOptions::default();
    for (name, data) in [
        (POISONED_MEMBERS[0], &b"escaped"[..]),
        (SAFE_MEMBER, &b"fine"[..]),
        (POISONED_MEMBERS[1], &b"absolute"[..]),
    ] {
        zip.start_file(name, options)?;
        zip.write_all(data)?;
    }
    zip.finish()?;
    Ok(path.to_path_buf())
}

/// A tar whose members sit under two top-level directories, `a/` and `b/`
pub fn two_root_tar(path: &Path) -> Result<PathBuf> {
    let mut builder = Builder::new(File::create(path)?);
    for (name, data) in [("a/one.txt", &b"1"[..]), ("b/two.txt", &b"2"[..])] {
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, name, data)?;
    }
    builder.into_inner()?.flush()?;
    Ok(path.to_path_buf())
}

/// One member of a tar built by [`tar_of`]
#[derive(Debug, Clone, Copy)]
pub enum Member<'a> {
    File(&'a str, &'a [u8]),
    Symlink(&'a str, &'a str),
    HardLink(&'a str, &'a str),
}

/// A plain tar holding `members` in order
pub fn tar_of(path: &Path, members: &[Member<'_>]) -> Result<PathBuf> {
    let mut builder = Builder::new(File::create(path)?);
    for member in members {
        let mut header = Header::new_gnu();
        match *member {
            Member::File(name, data) => {
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                builder.append_data(&mut header, name, data)?;
            }
            Member::Symlink(name, target) => {
                header.set_entry_type(EntryType::Symlink);
                header.set_size(0);
                header.set_mode(0o777);
                builder.append_link(&mut header, name, target)?;
            }
            Member::HardLink(name, target) => {
                header.set_entry_type(EntryType::Link);
                header.set_size(0);
                header.set_mode(0o644);
                builder.append_link(&mut header, name, target)?;
            }
        }
    }
    builder.into_inner()?.flush()?;
    Ok(path.to_path_buf())
}

/// A gzip-compressed tar of `dir`, stored under `dir`'s own name
pub fn tar_gz_of(dir: &Path, path: &Path) -> Result<PathBuf> {
    let name = dir
        .file_name()
        .ok_or_else(|| anyhow!("{:?} has no file name", dir))?;
    let encoder = GzEncoder::new(File::create(path)?, Compression::default());
    let mut builder = Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir_all(name, dir)?;
    builder.into_inner()?.finish()?.flush()?;
    Ok(path.to_path_buf())
}

/// Copy of `source` cut to its first half
pub fn truncated_copy(source: &Path, path: &Path) -> Result<PathBuf> {
    let bytes = std::fs::read(source)?;
    std::fs::write(path, &bytes[..bytes.len() / 2])?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestDir;

    #[test]
    fn test_poisoned_tar_keeps_raw_names() {
        let test_dir = TestDir::new().unwrap();
        let path = poisoned_tar(&test_dir.join("evil.tar")).unwrap();

        let mut archive = tar::Archive::new(File::open(path).unwrap());
        let names: Vec<Vec<u8>> = archive
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap().path_bytes().into_owned())
            .collect();
        assert_eq!(names[0], b"../../evil.txt".to_vec());
        assert_eq!(names[2], b"/abs/evil.txt".to_vec());
    }

    #[test]
    fn test_tar_of_keeps_link_types() {
        let test_dir = TestDir::new().unwrap();
        let path = tar_of(
            &test_dir.join("links.tar"),
            &[
                Member::File("bundle/data.bin", b"data"),
                Member::HardLink("bundle/copy.bin", "bundle/data.bin"),
                Member::Symlink("bundle/latest", "data.bin"),
            ],
        )
        .unwrap();

        let mut archive = tar::Archive::new(File::open(path).unwrap());
        let types: Vec<EntryType> = archive
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap().header().entry_type())
            .collect();
        assert_eq!(types, vec![EntryType::Regular, EntryType::Link, EntryType::Symlink]);
    }

    #[test]
    fn test_truncated_copy_is_shorter() {
        let test_dir = TestDir::new().unwrap();
        let source = test_dir.create_file("full.bin", &[7u8; 100]).unwrap();
        let cut = truncated_copy(&source, &test_dir.join("cut.bin")).unwrap();
        assert_eq!(std::fs::metadata(cut).unwrap().len(), 50);
    }
}
