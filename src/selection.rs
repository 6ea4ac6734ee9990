use typed_builder::TypedBuilder;

use crate::encodings::HashFunctions;
use crate::manifest::Record;
use crate::picklist::Picklist;
use crate::Result;

/// A predicate restricting which sketches are visible: unset fields
/// match everything. Applied at the manifest level where possible, and
/// to materialized signatures otherwise.
#[derive(Default, Debug, TypedBuilder, Clone)]
pub struct Selection {
    #[builder(default, setter(strip_option))]
    ksize: Option<u32>,

    #[builder(default, setter(strip_option))]
    abund: Option<bool>,

    #[builder(default, setter(strip_option))]
    num: Option<u32>,

    #[builder(default, setter(strip_option))]
    scaled: Option<u32>,

    #[builder(default, setter(strip_option))]
    moltype: Option<HashFunctions>,

    #[builder(default, setter(strip_option))]
    picklist: Option<Picklist>,
}

pub trait Select {
    fn select(self, selection: &Selection) -> Result<Self>
    where
        Self: Sized;
}

impl Selection {
    pub fn ksize(&self) -> Option<u32> {
        self.ksize
    }

    pub fn set_ksize(&mut self, ksize: u32) {
        self.ksize = Some(ksize);
    }

    pub fn abund(&self) -> Option<bool> {
        self.abund
    }

    pub fn set_abund(&mut self, value: bool) {
        self.abund = Some(value);
    }

    pub fn num(&self) -> Option<u32> {
        self.num
    }

    pub fn set_num(&mut self, num: u32) {
        self.num = Some(num);
    }

    pub fn scaled(&self) -> Option<u32> {
        self.scaled
    }

    pub fn set_scaled(&mut self, scaled: u32) {
        self.scaled = Some(scaled);
    }

    pub fn moltype(&self) -> Option<HashFunctions> {
        self.moltype
    }

    pub fn set_moltype(&mut self, value: HashFunctions) {
        self.moltype = Some(value);
    }

    pub fn picklist(&self) -> Option<Picklist> {
        self.picklist.clone()
    }

    pub fn set_picklist(&mut self, value: Picklist) {
        self.picklist = Some(value);
    }

    /// A selection matching exactly one manifest row, used to pick the
    /// right sketch out of a multi-sketch signature on load.
    pub fn from_record(row: &Record) -> Result<Self> {
        Ok(Self {
            ksize: Some(row.ksize()),
            abund: Some(row.with_abundance()),
            moltype: Some(row.moltype()?),
            num: None,
            scaled: None,
            picklist: None,
        })
    }
}
