use super::{Container, ContainerKind};
use crate::error::{Result, RomError};
use crate::model::FileInformation;
use ::zip::write::SimpleFileOptions;
use ::zip::{CompressionMethod, ZipArchive, ZipWriter};
use chrono::{DateTime, NaiveDate, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read};
use std::path::Path;
use tempfile::NamedTempFile;

/// A ZIP archive; entries carry the CRC32 stored in the central directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipContainer;

fn open_archive(path: &Path) -> Result<ZipArchive<BufReader<File>>> {
    let file = File::open(path)?;
    Ok(ZipArchive::new(BufReader::new(file))?)
}

fn write_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9))
}

fn to_chrono(dt: ::zip::DateTime) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(dt.year() as i32, dt.month() as u32, dt.day() as u32)?
        .and_hms_opt(dt.hour() as u32, dt.minute() as u32, dt.second() as u32)
        .map(|naive| naive.and_utc())
}

/// Open `archive` for appending, creating it when absent.
fn open_writer(archive: &Path) -> Result<ZipWriter<File>> {
    if archive.exists() {
        let file = OpenOptions::new().read(true).write(true).open(archive)?;
        Ok(ZipWriter::new_append(file)?)
    } else {
        if let Some(parent) = archive.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(ZipWriter::new(File::create(archive)?))
    }
}

impl ZipContainer {
    fn contains(archive: &Path, entry_name: &str) -> Result<bool> {
        if !archive.exists() {
            return Ok(false);
        }
        Ok(open_archive(archive)?.index_for_name(entry_name).is_some())
    }

    /// Add an entry from a stream. Returns false when the name already exists.
    pub fn add_from_reader(archive: &Path, entry_name: &str, reader: &mut dyn Read) -> Result<bool> {
        if Self::contains(archive, entry_name)? {
            return Ok(false);
        }
        let mut writer = open_writer(archive)?;
        writer.start_file(entry_name, write_options())?;
        io::copy(reader, &mut writer)?;
        writer.finish()?;
        Ok(true)
    }

    pub fn add_from_path(archive: &Path, entry_name: &str, source: &Path) -> Result<bool> {
        let mut reader = BufReader::new(File::open(source)?);
        Self::add_from_reader(archive, entry_name, &mut reader)
    }

    /// Copy an entry's compressed bytes into another archive under a new name.
    pub fn add_raw(archive: &Path, entry_name: &str, source: &FileInformation) -> Result<bool> {
        if Self::contains(archive, entry_name)? {
            return Ok(false);
        }
        let mut source_archive = open_archive(&source.container_path)?;
        let index = source_archive
            .index_for_name(&source.entry_name)
            .ok_or_else(|| RomError::entry_not_found(source.display_path()))?;

        let mut writer = open_writer(archive)?;
        let entry = source_archive.by_index_raw(index)?;
        writer.raw_copy_file_rename(entry, entry_name)?;
        writer.finish()?;
        Ok(true)
    }

    /// Rewrite `archive` without `entry_name`, via a temporary file in the same folder.
    fn rewrite_without(archive: &Path, entry_name: &str) -> Result<()> {
        let dir = archive.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = NamedTempFile::new_in(dir)?;
        {
            let mut source = open_archive(archive)?;
            let mut writer = ZipWriter::new(temp.as_file_mut());
            for i in 0..source.len() {
                let entry = source.by_index_raw(i)?;
                if entry.name() == entry_name {
                    continue;
                }
                writer.raw_copy_file(entry)?;
            }
            writer.finish()?;
        }
        temp.persist(archive).map_err(|e| e.error)?;
        Ok(())
    }
}

impl Container for ZipContainer {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Zip
    }

    fn get_all_files(&self, path: &Path, _recursive: bool) -> Result<Vec<FileInformation>> {
        let mut archive = open_archive(path)?;
        let mut files = Vec::with_capacity(archive.len());

        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i)?;
            if entry.is_dir() {
                continue;
            }
            let mut file = FileInformation::new(path, ContainerKind::Zip, entry.name(), entry.size());
            file.reported_crc32 = entry.crc32().to_be_bytes().to_vec();
            file.compression = Some(format!("{:?}", entry.compression()));
            file.modified = entry.last_modified().and_then(to_chrono);
            files.push(file);
        }

        Ok(files)
    }

    fn read_entry(
        &self,
        file: &FileInformation,
        visit: &mut dyn FnMut(&mut dyn Read) -> Result<()>,
    ) -> Result<()> {
        let mut archive = open_archive(&file.container_path)?;
        let mut entry = archive.by_name(&file.entry_name)?;
        visit(&mut entry)
    }

    fn entry_names(&self, path: &Path) -> Result<Vec<String>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let archive = open_archive(path)?;
        Ok(archive
            .file_names()
            .filter(|n| !n.ends_with('/'))
            .map(str::to_string)
            .collect())
    }

    fn remove(&self, file: &FileInformation) -> Result<()> {
        let names = self.entry_names(&file.container_path)?;
        if !names.iter().any(|n| n == &file.entry_name) {
            return Err(RomError::entry_not_found(file.display_path()));
        }
        if names.len() == 1 {
            return self.remove_container(&file.container_path);
        }
        Self::rewrite_without(&file.container_path, &file.entry_name)
    }
}
