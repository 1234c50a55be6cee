use super::raw::Dbi;
use crate::core::alignment::{validate_alignment, AlignHint};
use crate::core::error::StoreError;
use crate::core::record::HEADER_SIZE;
use serde::{Deserialize, Serialize};

/// Creation index of a table.
pub type TableId = u16;

/// Name of the engine table holding every table's mode.
pub(crate) const CATALOG_NAME: &str = "__zerostore_tables";

const CATALOG_ENTRY_SIZE: usize = 8;
const TAG_UNALIGNED: u8 = 0;
const TAG_ALIGNED: u8 = 1;

/// How values land in a table.
///
/// `Aligned` tables only accept reserved writes placed at `record_align`,
/// which lets readers skip the alignment check. `Unaligned` tables accept
/// plain puts and readers check every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableMode {
    Aligned { record_align: usize },
    Unaligned,
}

impl Default for TableMode {
    fn default() -> Self {
        TableMode::aligned()
    }
}

impl TableMode {
    /// Covers every primitive type, SIMD lanes up to 128 bits and rkyv
    /// archives.
    pub const DEFAULT_RECORD_ALIGN: usize = 16;

    pub const fn aligned() -> Self {
        TableMode::Aligned {
            record_align: Self::DEFAULT_RECORD_ALIGN,
        }
    }

    pub fn is_alignment_guaranteed(&self) -> bool {
        matches!(self, TableMode::Aligned { .. })
    }

    /// Payload alignment guaranteed at rest (1 when nothing is guaranteed).
    pub fn record_align(&self) -> usize {
        match self {
            TableMode::Aligned { record_align } => *record_align,
            TableMode::Unaligned => 1,
        }
    }

    /// Placement every reservation into this table must satisfy.
    pub fn required_hint(&self) -> AlignHint {
        match self {
            TableMode::Aligned { record_align } => AlignHint {
                align: *record_align,
                offset: HEADER_SIZE,
            },
            TableMode::Unaligned => AlignHint::NONE,
        }
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        match self {
            TableMode::Aligned { record_align } => validate_alignment(*record_align),
            TableMode::Unaligned => Ok(()),
        }
    }

    /// Catalog value: `[id u16][tag u8][0][record_align u32]`, little endian.
    pub(crate) fn to_catalog(self, id: TableId) -> [u8; CATALOG_ENTRY_SIZE] {
        let (tag, align) = match self {
            TableMode::Aligned { record_align } => (TAG_ALIGNED, record_align as u32),
            TableMode::Unaligned => (TAG_UNALIGNED, 0),
        };
        let mut entry = [0u8; CATALOG_ENTRY_SIZE];
        entry[0..2].copy_from_slice(&id.to_le_bytes());
        entry[2] = tag;
        entry[4..8].copy_from_slice(&align.to_le_bytes());
        entry
    }

    pub(crate) fn from_catalog(entry: &[u8]) -> Option<(TableId, Self)> {
        let entry: &[u8; CATALOG_ENTRY_SIZE] = entry.try_into().ok()?;
        let id = TableId::from_le_bytes([entry[0], entry[1]]);
        let align = u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]);
        let mode = match (entry[2], entry[3]) {
            (TAG_ALIGNED, 0) => TableMode::Aligned {
                record_align: align as usize,
            },
            (TAG_UNALIGNED, 0) if align == 0 => TableMode::Unaligned,
            _ => return None,
        };
        mode.validate().ok().map(|_| (id, mode))
    }
}

/// Handle to a named table.
///
/// Handles are plain values and may be shared freely between threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Table {
    pub(crate) id: TableId,
    pub(crate) dbi: Dbi,
    pub(crate) mode: TableMode,
}

impl Table {
    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn mode(&self) -> TableMode {
        self.mode
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TableState {
    pub name: String,
    pub dbi: Dbi,
    pub mode: TableMode,
}

/// Tables visible to one transaction, indexed by [`TableId`].
#[derive(Debug, Clone, Default)]
pub(crate) struct Catalog {
    tables: Vec<TableState>,
}

impl Catalog {
    /// Build from catalog entries in any order. Ids must be dense.
    pub fn from_entries(mut entries: Vec<(TableId, TableState)>) -> Result<Self, StoreError> {
        entries.sort_by_key(|(id, _)| *id);
        for (expected, (id, state)) in entries.iter().enumerate() {
            if *id as usize != expected {
                return Err(StoreError::CatalogCorrupted {
                    name: state.name.clone(),
                });
            }
        }
        Ok(Catalog {
            tables: entries.into_iter().map(|(_, state)| state).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// State of `table`, if the handle belongs to this catalog.
    pub fn get(&self, table: Table) -> Result<&TableState, StoreError> {
        self.tables
            .get(table.id as usize)
            .filter(|state| state.dbi == table.dbi && state.mode == table.mode)
            .ok_or_else(|| StoreError::TableNotFound(format!("#{}", table.id)))
    }

    pub fn find(&self, name: &str) -> Option<Table> {
        self.tables
            .iter()
            .position(|state| state.name == name)
            .map(|id| self.handle(id))
    }

    pub fn push(&mut self, name: String, dbi: Dbi, mode: TableMode) -> Table {
        self.tables.push(TableState { name, dbi, mode });
        self.handle(self.tables.len() - 1)
    }

    /// Every table in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (Table, &TableState)> + '_ {
        (0..self.tables.len()).map(|id| (self.handle(id), &self.tables[id]))
    }

    fn handle(&self, id: usize) -> Table {
        let state = &self.tables[id];
        Table {
            id: id as TableId,
            dbi: state.dbi,
            mode: state.mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_mode_catalog_round_trip() {
        for (id, mode) in [
            (0, TableMode::aligned()),
            (7, TableMode::Aligned { record_align: 64 }),
            (300, TableMode::Unaligned),
        ] {
            assert_eq!(TableMode::from_catalog(&mode.to_catalog(id)), Some((id, mode)));
        }
    }

    #[test]
    fn test_invalid_catalog_entry() {
        let mut entry = TableMode::aligned().to_catalog(0);
        entry[4] = 24;
        assert_eq!(TableMode::from_catalog(&entry), None);

        let mut entry = TableMode::aligned().to_catalog(0);
        entry[2] = 9;
        assert_eq!(TableMode::from_catalog(&entry), None);

        assert_eq!(TableMode::from_catalog(&[0u8; 4]), None);
    }

    #[test]
    fn test_record_align() {
        assert_eq!(TableMode::aligned().record_align(), 16);
        assert_eq!(TableMode::Unaligned.record_align(), 1);
        assert!(TableMode::default().is_alignment_guaranteed());
        assert!(!TableMode::Unaligned.is_alignment_guaranteed());
        assert_eq!(TableMode::Unaligned.required_hint(), AlignHint::NONE);
    }

    #[test]
    fn test_modes_and_handles_hash() {
        let modes: HashSet<TableMode> = [
            TableMode::aligned(),
            TableMode::aligned(),
            TableMode::Aligned { record_align: 64 },
            TableMode::Unaligned,
        ]
        .into_iter()
        .collect();
        assert_eq!(modes.len(), 3);

        let mut catalog = Catalog::default();
        let a = catalog.push("a".into(), 2, TableMode::aligned());
        let b = catalog.push("b".into(), 3, TableMode::Unaligned);
        let handles: HashSet<Table> = [a, b, a].into_iter().collect();
        assert_eq!(handles.len(), 2);
    }

    #[test]
    fn test_catalog_rejects_gaps() {
        let state = |name: &str| TableState {
            name: name.into(),
            dbi: 2,
            mode: TableMode::Unaligned,
        };
        let catalog = Catalog::from_entries(vec![(1, state("b")), (0, state("a"))]).unwrap();
        assert_eq!(catalog.find("b").map(|t| t.id()), Some(1));

        assert!(matches!(
            Catalog::from_entries(vec![(0, state("a")), (2, state("c"))]),
            Err(StoreError::CatalogCorrupted { ref name }) if name == "c"
        ));
    }

    #[test]
    fn test_foreign_handle_is_not_found() {
        let mut catalog = Catalog::default();
        let t = catalog.push("t".into(), 2, TableMode::aligned());
        let stale = Table { dbi: 9, ..t };
        assert!(catalog.get(t).is_ok());
        assert!(matches!(catalog.get(stale), Err(StoreError::TableNotFound(_))));
    }
}
