//! Entity view - one entity's reader plus its cached classification

use shoal_core::{FieldMap, ReaderId, ShoalResult};
use shoal_stream::{ReaderUpdate, StreamContext};

use crate::{Classification, Classifiers};

/// View over a single entity.
///
/// Classification is recomputed whenever the reader produces an update and
/// kept between updates. It is cleared while the reader has no valid state,
/// which marks the entity as not currently usable.
#[derive(Debug)]
pub struct EntityView {
    key: String,
    reader: ReaderId,
    classifiers: Classifiers,
    classification: Option<Classification>,
    update: Option<ReaderUpdate>,
}

impl EntityView {
    /// Open a reader on the entity's key
    pub fn open(key: &str, ctx: &mut StreamContext, classifiers: Classifiers) -> ShoalResult<Self> {
        let reader = ctx.open_reader(key)?;

        Ok(EntityView {
            key: key.to_string(),
            reader,
            classifiers,
            classification: None,
            update: None,
        })
    }

    pub fn tick(&mut self, ctx: &mut StreamContext) -> ShoalResult<()> {
        self.update = ctx.poll_reader(self.reader)?;

        match ctx.data(self.reader) {
            None => self.classification = None,
            Some(fields) => {
                if self.update.is_some() || self.classification.is_none() {
                    self.classification = Some(self.classifiers.classify(fields));
                }
            }
        }

        Ok(())
    }

    pub fn close(self, ctx: &mut StreamContext) -> ShoalResult<()> {
        ctx.close_reader(self.reader)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn reader(&self) -> ReaderId {
        self.reader
    }

    /// Valid iff the reader is valid as of the last tick
    pub fn is_valid(&self) -> bool {
        self.classification.is_some()
    }

    pub fn classification(&self) -> Option<&Classification> {
        self.classification.as_ref()
    }

    /// What the reader produced on the last tick
    pub fn update(&self) -> Option<&ReaderUpdate> {
        self.update.as_ref()
    }

    pub fn fields<'a>(&self, ctx: &'a StreamContext) -> Option<&'a FieldMap> {
        ctx.data(self.reader)
    }
}
