use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, Write};
use std::path::Path;

use anyhow::{anyhow, Context};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const MAIN_DOCUMENT: &str = "word/document.xml";

pub struct DocxPackage {
    pub entries: Vec<DocxEntry>,
}

pub struct DocxEntry {
    pub name: String,
    pub data: Vec<u8>,
    pub compression: CompressionMethod,
    pub last_modified: zip::DateTime,
    pub unix_mode: Option<u32>,
    pub is_dir: bool,
}

impl DocxPackage {
    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let f = File::open(path).with_context(|| format!("open docx: {}", path.display()))?;
        Self::from_reader(BufReader::new(f)).with_context(|| format!("read docx: {}", path.display()))
    }

    pub fn from_reader<R: Read + Seek>(reader: R) -> anyhow::Result<Self> {
        let mut zip = ZipArchive::new(reader).context("read zip")?;
        let mut entries = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let mut file = zip.by_index(i).context("zip entry")?;
            let mut data = Vec::with_capacity(file.size() as usize);
            file.read_to_end(&mut data)
                .with_context(|| format!("read zip entry: {}", file.name()))?;
            entries.push(DocxEntry {
                name: file.name().to_string(),
                data,
                compression: file.compression(),
                last_modified: file.last_modified().unwrap_or_default(),
                unix_mode: file.unix_mode(),
                is_dir: file.is_dir(),
            });
        }
        Ok(Self { entries })
    }

    pub fn entry(&self, name: &str) -> Option<&DocxEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// UTF-8 text of `word/document.xml`.
    pub fn main_document(&self) -> anyhow::Result<String> {
        let ent = self
            .entry(MAIN_DOCUMENT)
            .ok_or_else(|| anyhow!("package has no {MAIN_DOCUMENT}"))?;
        String::from_utf8(ent.data.clone()).with_context(|| format!("{MAIN_DOCUMENT} is not valid UTF-8"))
    }

    pub fn write_with_replacements(
        &self,
        output_path: &Path,
        replacements: &HashMap<String, Vec<u8>>,
    ) -> anyhow::Result<()> {
        if let Some(dir) = output_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create output dir: {}", dir.display()))?;
        }
        let f = File::create(output_path)
            .with_context(|| format!("create output docx: {}", output_path.display()))?;
        self.write_to(f, replacements)
    }

    /// Re-emits every member in original order; members not in `replacements` keep their bytes.
    pub fn write_to<W: Write + Seek>(
        &self,
        writer: W,
        replacements: &HashMap<String, Vec<u8>>,
    ) -> anyhow::Result<()> {
        let mut zout = ZipWriter::new(writer);
        for ent in &self.entries {
            let data = replacements.get(&ent.name).unwrap_or(&ent.data);
            let mut opts = SimpleFileOptions::default()
                .compression_method(ent.compression)
                .last_modified_time(ent.last_modified);
            if let Some(mode) = ent.unix_mode {
                opts = opts.unix_permissions(mode);
            }
            if ent.is_dir || ent.name.ends_with('/') {
                zout.add_directory(&ent.name, opts)
                    .with_context(|| format!("add zip dir: {}", ent.name))?;
            } else {
                zout.start_file(&ent.name, opts)
                    .with_context(|| format!("start zip file: {}", ent.name))?;
                zout.write_all(data)
                    .with_context(|| format!("write zip file: {}", ent.name))?;
            }
        }
        zout.finish().context("finish zip")?;
        Ok(())
    }
}
