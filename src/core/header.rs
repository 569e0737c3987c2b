use std::fmt;

/// The mandatory column names of the `#CHROM` line, in order
pub const MANDATORY_COLUMNS: [&str; 8] = [
    "CHROM", "POS", "ID", "REF", "ALT", "QUAL", "FILTER", "INFO",
];

/// One `##` meta-line of a VCF header
///
/// A bare `##name=value` line is stored with zero keys and a single value.
/// A structured `##name=<k1=v1,k2=v2>` line is stored with parallel, equal-length
/// key and value lists in their original order. Values are kept verbatim, so a
/// quoted `Description` keeps its quotes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderEntry {
    name: String,
    keys: Vec<String>,
    values: Vec<String>,
}
impl HeaderEntry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a bare `name=value` entry
    #[must_use]
    pub fn bare(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keys: Vec::new(),
            values: vec![value.into()],
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn add_key(&mut self, key: impl Into<String>) {
        self.keys.push(key.into());
    }

    pub fn add_value(&mut self, value: impl Into<String>) {
        self.values.push(value.into());
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    #[must_use]
    pub fn values(&self) -> &[String] {
        &self.values
    }

    #[must_use]
    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }

    /// Returns true for `name=<...>` entries
    #[must_use]
    pub fn is_structured(&self) -> bool {
        !self.keys.is_empty()
    }

    /// Returns the value of a bare `name=value` entry
    #[must_use]
    pub fn value(&self) -> Option<&str> {
        if self.is_structured() {
            None
        } else {
            self.values.first().map(String::as_str)
        }
    }

    /// Looks up the value stored under `key` in a structured entry
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.keys
            .iter()
            .position(|k| k == key)
            .and_then(|idx| self.values.get(idx))
            .map(String::as_str)
    }

    /// Iterates over `(key, value)` pairs of a structured entry
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.keys
            .iter()
            .zip(self.values.iter())
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Re-serializes the entry as a `##` meta-line, without the line terminator
impl fmt::Display for HeaderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "##{}=", self.name)?;
        if !self.is_structured() {
            return f.write_str(self.values.first().map_or("", String::as_str));
        }
        f.write_str("<")?;
        for (idx, (key, value)) in self.pairs().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{key}={value}")?;
        }
        f.write_str(">")
    }
}

/// Everything a VCF file declares before its first data line
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VcfHeader {
    pub(crate) file_format: Option<String>,
    pub(crate) entries: Vec<HeaderEntry>,
    pub(crate) samples: Vec<String>,
    pub(crate) complete: bool,
}
impl VcfHeader {
    /// The value of the `##fileformat=` line, if any
    #[must_use]
    pub fn file_format(&self) -> Option<&str> {
        self.file_format.as_deref()
    }

    /// All meta-lines except `##fileformat`, in file order
    #[must_use]
    pub fn entries(&self) -> &[HeaderEntry] {
        &self.entries
    }

    /// Meta-lines with the given name (e.g. `INFO`), in file order
    pub fn entries_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a HeaderEntry> {
        self.entries.iter().filter(move |e| e.name() == name)
    }

    #[must_use]
    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    #[must_use]
    pub fn num_header_entries(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    /// True once the `#CHROM` column header line has been read
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub(crate) fn set_file_format(&mut self, value: &[u8]) {
        self.file_format = Some(String::from_utf8_lossy(value).into_owned());
    }

    pub(crate) fn add_entry(&mut self, entry: HeaderEntry) {
        self.entries.push(entry);
    }

    pub(crate) fn set_samples(&mut self, samples: Vec<String>) {
        self.samples = samples;
        self.complete = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_entry_display() {
        let entry = HeaderEntry::bare("source", "myImputationProgramV3.1");
        assert_eq!(entry.to_string(), "##source=myImputationProgramV3.1");
        assert_eq!(entry.value(), Some("myImputationProgramV3.1"));
        assert!(!entry.is_structured());
    }

    #[test]
    fn test_structured_entry_display() {
        let mut entry = HeaderEntry::new();
        entry.set_name("INFO");
        for (k, v) in [("ID", "DP"), ("Number", "1"), ("Type", "Integer")] {
            entry.add_key(k);
            entry.add_value(v);
        }
        assert_eq!(entry.to_string(), "##INFO=<ID=DP,Number=1,Type=Integer>");
        assert_eq!(entry.get("Type"), Some("Integer"));
        assert_eq!(entry.get("Description"), None);
        assert_eq!(entry.value(), None);
    }

    #[test]
    fn test_entries_named() {
        let mut header = VcfHeader::default();
        header.add_entry(HeaderEntry::bare("source", "x"));
        let mut info = HeaderEntry::new();
        info.set_name("INFO");
        info.add_key("ID");
        info.add_value("DP");
        header.add_entry(info);
        assert_eq!(header.entries_named("INFO").count(), 1);
        assert_eq!(header.num_header_entries(), 2);
    }

    #[test]
    fn test_set_samples_completes_header() {
        let mut header = VcfHeader::default();
        assert!(!header.is_complete());
        header.set_samples(vec!["S1".into(), "S2".into()]);
        assert!(header.is_complete());
        assert_eq!(header.num_samples(), 2);
    }
}
