use std::collections::BTreeMap;
use std::io::Read;

use gridref_error::{GridRefResult, gridref_bail, gridref_err};
use serde::{Deserialize, Serialize};

/// One line of a side-channel index: `<idx>:<offset>:<date>:<attrs>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideChannelEntry {
    /// The message number as written, starting at 1.
    pub idx: usize,
    pub offset: u64,
    pub date: String,
    /// Free text descriptor of the message, may itself contain colons.
    pub attrs: String,
    /// Distance to the next message, or to the end of the resource for the last one.
    pub length: u64,
}

/// An authoritative listing of message offsets produced independently of the decoder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideChannelIndex {
    entries: Vec<SideChannelEntry>,
}

impl SideChannelIndex {
    /// Parse the listing of a resource of `resource_size` bytes.
    ///
    /// With `validate`, descriptors must be unique.
    pub fn parse(text: &str, resource_size: u64, validate: bool) -> GridRefResult<Self> {
        let rows = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(number, line)| parse_line(number + 1, line.trim_end()))
            .collect::<GridRefResult<Vec<_>>>()?;

        let mut entries = Vec::with_capacity(rows.len());
        for (i, (idx, offset, date, attrs)) in rows.iter().enumerate() {
            let end = rows.get(i + 1).map_or(resource_size, |next| next.1);
            let length = end.checked_sub(*offset).ok_or_else(|| {
                gridref_err!(
                    Validation: "message {} at offset {} ends before it starts, at {}",
                    idx,
                    offset,
                    end
                )
            })?;
            entries.push(SideChannelEntry {
                idx: *idx,
                offset: *offset,
                date: date.to_string(),
                attrs: attrs.to_string(),
                length,
            });
        }

        let index = Self { entries };
        if validate {
            let duplicates = index.duplicate_descriptors();
            if !duplicates.is_empty() {
                gridref_bail!(
                    Validation: "attribute mapping is not unique, {} entries share a descriptor",
                    duplicates.len()
                );
            }
        }
        Ok(index)
    }

    pub fn read(mut reader: impl Read, resource_size: u64, validate: bool) -> GridRefResult<Self> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        Self::parse(&text, resource_size, validate)
    }

    pub fn entries(&self) -> &[SideChannelEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose descriptor appears more than once, in listing order.
    pub fn duplicate_descriptors(&self) -> Vec<&SideChannelEntry> {
        let mut counts = BTreeMap::<&str, usize>::new();
        for entry in &self.entries {
            *counts.entry(entry.attrs.as_str()).or_default() += 1;
        }
        self.entries
            .iter()
            .filter(|entry| counts[entry.attrs.as_str()] > 1)
            .collect()
    }
}

fn parse_line(number: usize, line: &str) -> GridRefResult<(usize, u64, &str, &str)> {
    let mut fields = line.splitn(4, ':');
    let (Some(idx), Some(offset), Some(date), Some(attrs)) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        gridref_bail!(Manifest: "line {} has fewer than four fields: {}", number, line);
    };
    let idx = idx
        .trim()
        .parse()
        .map_err(|e| gridref_err!(Manifest: "line {} has an invalid message number {}: {}", number, idx, e))?;
    let offset = offset
        .trim()
        .parse()
        .map_err(|e| gridref_err!(Manifest: "line {} has an invalid offset {}: {}", number, offset, e))?;
    Ok((idx, offset, date, attrs))
}
