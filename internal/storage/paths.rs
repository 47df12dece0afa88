use crate::util::time;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

pub const TEMP_FILE_NAME: &str = "blob.tmp";

/// Globally unique object identifier `{yyyy}-{uuid4}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocId {
    year: i32,
    uuid: Uuid,
}

impl DocId {
    pub fn generate(year: Option<i32>) -> Self {
        Self {
            year: year.unwrap_or_else(time::current_year),
            uuid: Uuid::new_v4(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        let (year_part, rest) = raw
            .split_once('-')
            .ok_or_else(|| "doc id must be {year}-{uuid}".to_string())?;
        if year_part.len() != 4 || !year_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err("doc id must start with a four-digit year".into());
        }
        let year: i32 = year_part
            .parse()
            .map_err(|_| "doc id year is not a number".to_string())?;
        let uuid = Uuid::parse_str(rest).map_err(|_| "doc id suffix is not a UUID".to_string())?;
        if rest != uuid.hyphenated().to_string() {
            return Err("doc id UUID must be canonical lowercase".into());
        }
        Ok(Self { year, uuid })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{}", self.year, self.uuid.hyphenated())
    }
}

/// Maps DocIds onto the partitioned directory tree
/// `{root}/{year}/{b1}/{b2}/{doc_id}`.
#[derive(Clone)]
pub struct PathBuilder {
    root: PathBuf,
}

impl PathBuilder {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn blob_dir(&self, doc_id: &DocId) -> PathBuf {
        let hex = doc_id.uuid.simple().to_string();
        let shard_a = &hex[0..2];
        let shard_b = &hex[2..4];
        self.root
            .join(doc_id.year.to_string())
            .join(shard_a)
            .join(shard_b)
            .join(doc_id.to_string())
    }

    pub fn blob_path(&self, doc_id: &DocId, ext: &str) -> PathBuf {
        let ext = ext.trim_start_matches('.');
        self.blob_dir(doc_id).join(format!("blob.{ext}"))
    }

    pub fn temp_path(&self, doc_id: &DocId) -> PathBuf {
        self.blob_dir(doc_id).join(TEMP_FILE_NAME)
    }
}
