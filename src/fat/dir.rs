//! Directory entries for the one-file root directory.

use core::convert::TryInto;
use core::fmt::{self, Debug};

pub enum Attribute {
    ReadOnly = 0x01,
    Hidden = 0x02,
    System = 0x04,
    VolumeId = 0x08,
    Directory = 0x10,
    Archive = 0x20,
}

#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct AttributeSet {
    inner: u8,
}

impl AttributeSet {
    pub const fn of(attr: Attribute) -> Self {
        Self { inner: attr as u8 }
    }
}

impl Debug for AttributeSet {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{:#04X}", self.inner)
    }
}

#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct FileName(pub [u8; 8]);

impl Debug for FileName {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in self.0.iter() {
            if *i == 0x20 || *i == 0x00 {
                return Ok(())
            } else {
                write!(fmt, "{}", *i as char)?;
            }
        }

        Ok(())
    }
}

impl FileName {
    // Space-pads; discards extra/non-ascii characters.
    pub fn new(s: &str) -> Self {
        let mut name = [0x20; 8];

        if s.chars().all(|c| c.is_ascii()) {
            let l = s.len().min(8);
            name[..l].copy_from_slice(&s.as_bytes()[..l]);
        }

        Self(name)
    }
}

#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct FileExt(pub [u8; 3]);

impl Debug for FileExt {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        for i in self.0.iter() {
            if *i == 0x20 || *i == 0x00 {
                return Ok(())
            } else {
                write!(fmt, "{}", *i as char)?;
            }
        }

        Ok(())
    }
}

impl FileExt {
    // Space-pads; discards extra/non-ascii characters.
    pub fn new(s: &str) -> Self {
        let mut ext = [0x20; 3];

        if s.chars().all(|c| c.is_ascii()) {
            let l = s.len().min(3);
            ext[..l].copy_from_slice(&s.as_bytes()[..l]);
        }

        Self(ext)
    }
}

/// The 8.3 short name of the one file the volume carries.
pub const CONFIG_NAME: FileName = FileName(*b"CONFIG  ");
pub const CONFIG_EXT: FileExt = FileExt(*b"TXT");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirEntry {
    // Offset: 00
    pub file_name: FileName,
    // Offset: 08
    pub file_ext: FileExt,
    // Offset: 11
    pub attributes: AttributeSet,
    // Offset: 12
    _win_nt: u8,
    // Offset: 13
    creation_time_tenth_secs: u8,
    // Offset: 14
    creation_time_double_secs: u16,
    // Offset: 16
    creation_date: u16,
    // Offset: 18
    last_access_date: u16,
    // Offset: 20
    cluster_num_upper: u16,
    // Offset: 22
    last_modif_time: u16,
    // Offset: 24
    last_modif_date: u16,
    // Offset: 26
    cluster_num_lower: u16,
    // Offset: 28
    pub file_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Exists,
    Deleted,
    End,
}

impl DirEntry {
    pub fn state(&self) -> State {
        match self.file_name.0[0] {
            0x00 => State::End,
            0xE5 => State::Deleted,
            _ => State::Exists,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new_file(name: FileName, ext: FileExt, cluster_num: u16, size: u32) -> Self {
        let mut d = Self::default();

        d.file_name = name;
        d.file_ext = ext;
        d.attributes = AttributeSet::of(Attribute::Archive);
        d.set_cluster_num(cluster_num);
        d.file_size = size;

        d
    }

    /// The canonical `CONFIG.TXT` entry: always cluster 2, archive bit set.
    pub fn config_txt(size: u32) -> Self {
        Self::new_file(CONFIG_NAME, CONFIG_EXT, super::FIRST_CLUSTER, size)
    }

    pub fn is_config_txt(&self) -> bool {
        self.state() == State::Exists
            && self.file_name == CONFIG_NAME
            && self.file_ext == CONFIG_EXT
    }

    pub fn from_arr(arr: [u8; 32]) -> Self {
        macro_rules! e {
            ($ty:tt, $offset:literal) => {
                $ty::from_le_bytes(arr[$offset..($offset + core::mem::size_of::<$ty>())].try_into().unwrap())
            };
        }

        Self {
            file_name: FileName(arr[0..8].try_into().unwrap()),
            file_ext: FileExt(arr[8..11].try_into().unwrap()),
            attributes: AttributeSet { inner: arr[11] },
            _win_nt: arr[12],
            creation_time_tenth_secs: arr[13],
            creation_time_double_secs: e!(u16, 14),
            creation_date: e!(u16, 16),
            last_access_date: e!(u16, 18),
            cluster_num_upper: e!(u16, 20),
            last_modif_time: e!(u16, 22),
            last_modif_date: e!(u16, 24),
            cluster_num_lower: e!(u16, 26),
            file_size: e!(u32, 28),
        }
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, ()> {
        Ok(Self::from_arr(slice.try_into().map_err(|_| ())?))
    }

    pub fn into_arr(&self, arr: &mut [u8; 32]) {
        macro_rules! w {
            ($field:expr, $offset:literal) => {{
                let bytes = $field.to_le_bytes();
                arr[$offset..($offset + bytes.len())].copy_from_slice(&bytes);
            }};
        }

        arr[0..8].copy_from_slice(&self.file_name.0);
        arr[8..11].copy_from_slice(&self.file_ext.0);
        arr[11] = self.attributes.inner;
        arr[12] = self._win_nt;
        arr[13] = self.creation_time_tenth_secs;
        w!(self.creation_time_double_secs, 14);
        w!(self.creation_date, 16);
        w!(self.last_access_date, 18);
        w!(self.cluster_num_upper, 20);
        w!(self.last_modif_time, 22);
        w!(self.last_modif_date, 24);
        w!(self.cluster_num_lower, 26);
        w!(self.file_size, 28);
    }

    pub fn cluster_num(&self) -> u16 {
        // The upper half only matters on FAT32; it stays zero here.
        self.cluster_num_lower
    }

    pub fn set_cluster_num(&mut self, c: u16) {
        self.cluster_num_upper = 0;
        self.cluster_num_lower = c;
    }
}
