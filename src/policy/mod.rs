mod composite;
mod document;
mod storage;
mod template;
mod verifier;

pub use composite::{ComponentReference, CompositeAnalysis, CompositeAnalyzer};
pub use document::{CompositeComponent, DatasetMapping, LevelKeys, OneOrMany, Policy, Section};
pub use storage::{Storage, KNOWN_STORAGES};
pub use template::{
    DataId, DataIdValue, KeySet, Template, TemplateField, TemplateSegment, BUILTIN_KEYS,
};
pub use verifier::{
    CompositeValidation, DuplicateName, EmptyComposite, FieldValidation, LevelValidation,
    MalformedTemplateUse, MisplacedField, MissingField, NameValidation, PolicyVerifier,
    StorageValidation, TableOverlap, TemplateValidation, UnknownLevel, UnknownStorageTag,
    UnknownTemplateKey, ValidationReport,
};
