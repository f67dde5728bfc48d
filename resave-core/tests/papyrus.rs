mod common;

use common::{Container, InstanceSpec, PapyrusBlock, ScriptSpec};
use pretty_assertions::assert_eq;
use resave_core::{LoadOptions, Referent, SaveFile};

fn load(bytes: &[u8]) -> resave_core::LoadResult {
    SaveFile::from_bytes(bytes, &LoadOptions::default()).unwrap()
}

fn with_members(
    mut block: PapyrusBlock,
    variables: impl Fn(&PapyrusBlock) -> Vec<Vec<u8>>,
) -> PapyrusBlock {
    block.strings = ["Foo", "Actor", "target", "other"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    block.scripts = vec![ScriptSpec {
        name: 0,
        parent: 0,
        members: vec![(2, 1), (3, 1)],
    }];
    let variables = variables(&block);
    block.instances = vec![InstanceSpec {
        eid: 0x1234,
        script: 0,
        ref_id: 0x000001,
        variables,
    }];
    block
}

#[test]
fn undefined_reference_is_not_null() {
    let block = with_members(PapyrusBlock::foo(), |b| vec![b.ref_variable(1, 0), b.ref_variable(1, 0xDEAD)]);
    let mut container = Container::skyrim_le();
    container.papyrus = Some(block);
    let bytes = container.build();

    let loaded = load(&bytes);
    assert!(!loaded.truncated);
    let papyrus = loaded.save.papyrus().unwrap();
    let instance = papyrus.script_instances.values().next().unwrap();
    let referents: Vec<_> = instance
        .variables()
        .iter()
        .map(|v| v.referent())
        .collect();
    assert_eq!(referents, vec![Some(Referent::Null), Some(Referent::Undefined)]);
    assert_eq!(papyrus.undefined_reference_count(), 1);

    // an undefined reference is legal and is written back untouched
    assert_eq!(loaded.save.to_bytes().unwrap(), bytes);
}

#[test]
fn self_reference_resolves_to_the_instance() {
    let block = with_members(PapyrusBlock::foo(), |b| vec![b.ref_variable(1, 0x1234), b.ref_variable(1, 0x1234)]);
    let mut container = Container::skyrim_se();
    container.papyrus = Some(block);
    let loaded = load(&container.build());
    let papyrus = loaded.save.papyrus().unwrap();
    let instance = papyrus.script_instances.values().next().unwrap();
    assert!(instance
        .variables()
        .iter()
        .all(|v| v.referent() == Some(Referent::ScriptInstance)));
    assert_eq!(papyrus.undefined_reference_count(), 0);
}

#[test]
fn fallout4_uses_wide_ids() {
    let block = with_members(PapyrusBlock::foo().fallout4(), |b| {
        vec![b.ref_variable(1, 0x1234), b.ref_variable(1, 0x1_0000_1234)]
    });
    let mut container = Container::fallout4();
    container.papyrus = Some(block);
    let bytes = container.build();

    let loaded = load(&bytes);
    assert!(!loaded.truncated);
    let papyrus = loaded.save.papyrus().unwrap();
    let instance = papyrus.script_instances.values().next().unwrap();
    let variables = instance.variables();
    assert_eq!(variables[0].referent(), Some(Referent::ScriptInstance));
    assert_eq!(variables[1].eid().unwrap().raw(), 0x1_0000_1234);
    assert_eq!(variables[1].referent(), Some(Referent::Undefined));
    assert_eq!(loaded.save.to_bytes().unwrap(), bytes);
}

#[test]
fn string_table_bug_truncates_the_snapshot() {
    let mut block = PapyrusBlock::foo();
    block.instances[0].script = 40;
    let mut container = Container::skyrim_le();
    container.papyrus = Some(block);

    let loaded = load(&container.build());
    assert!(loaded.truncated);
    let papyrus = loaded.save.papyrus().unwrap();
    assert!(papyrus.truncated);
    assert!(papyrus.string_table_bug);
    // the definitions before the failure are kept
    assert_eq!(papyrus.scripts.len(), 1);
    assert!(papyrus.failure.as_deref().unwrap().contains("string index 40"));

    assert!(matches!(
        loaded.save.to_bytes().unwrap_err(),
        resave_core::Error::Truncated
    ));
}

#[test]
fn illegal_variable_tag_truncates_the_snapshot() {
    let block = with_members(PapyrusBlock::foo(), |_| vec![vec![9, 0, 0, 0, 0], vec![0]]);
    let mut container = Container::skyrim_le();
    container.papyrus = Some(block);

    let loaded = load(&container.build());
    assert!(loaded.truncated);
    let papyrus = loaded.save.papyrus().unwrap();
    assert!(!papyrus.string_table_bug);
    assert!(papyrus.failure.as_deref().unwrap().contains("tag 0x09"));
}

#[test]
fn opaque_tail_is_kept() {
    let mut block = PapyrusBlock::foo();
    block.tail = vec![0xDE, 0xAD, 0xBE, 0xEF];
    let mut container = Container::skyrim_le();
    container.papyrus = Some(block);
    let bytes = container.build();

    let loaded = load(&bytes);
    let papyrus = loaded.save.papyrus().unwrap();
    assert_eq!(papyrus.trailer.tail, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    assert_eq!(loaded.save.to_bytes().unwrap(), bytes);
}

#[test]
fn section_offset_drift_is_reported() {
    let mut container = Container::skyrim_le();
    container.offset_drift = 4;
    let err = SaveFile::from_bytes(&container.build(), &LoadOptions::default()).unwrap_err();
    assert!(err.is_position_mismatch(), "{}", err);
}

#[test]
fn instance_outranks_reference_with_the_same_id() {
    let mut block = with_members(PapyrusBlock::foo(), |b| vec![b.ref_variable(1, 0x1234), b.ref_variable(1, 0x5678)]);
    // the reference table comes after the script instances in the file
    block.references = vec![(0x1234, 0), (0x5678, 0)];
    let mut container = Container::skyrim_se();
    container.papyrus = Some(block);
    let bytes = container.build();

    let loaded = load(&bytes);
    assert!(!loaded.truncated);
    let papyrus = loaded.save.papyrus().unwrap();
    assert_eq!(papyrus.references.len(), 2);
    let instance = papyrus.script_instances.values().next().unwrap();
    let referents: Vec<_> = instance
        .variables()
        .iter()
        .map(|v| v.referent())
        .collect();
    assert_eq!(
        referents,
        vec![Some(Referent::ScriptInstance), Some(Referent::Reference)]
    );
    assert_eq!(loaded.save.registry().duplicate_definitions(), 1);
    assert_eq!(loaded.save.to_bytes().unwrap(), bytes);
}
