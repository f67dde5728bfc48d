mod common;

use common::{change_form, Container, PapyrusBlock};
use pretty_assertions::assert_eq;
use resave_core::papyrus::table::Link;
use resave_core::{Compression, Game, LoadOptions, Referent, SaveFile};

fn load(bytes: &[u8]) -> resave_core::LoadResult {
    SaveFile::from_bytes(bytes, &LoadOptions::default()).unwrap()
}

/// Load, write, load again: the digests and the decoded graphs must match.
fn assert_round_trip(bytes: &[u8]) -> SaveFile {
    let first = load(bytes);
    assert!(!first.truncated);
    let encoded = first.save.encode().unwrap();
    assert_eq!(encoded.digest, first.digest);

    let second = load(&encoded.bytes);
    assert_eq!(second.digest, first.digest);
    assert!(second.save == first.save, "re-read save differs");
    second.save
}

#[test]
fn minimal_foo_container() {
    let mut container = Container::skyrim_le();
    container.papyrus = Some(PapyrusBlock::foo());
    let bytes = container.build();

    let save = assert_round_trip(&bytes);
    // uncompressed saves come back byte for byte
    assert_eq!(save.to_bytes().unwrap(), bytes);

    let papyrus = save.papyrus().unwrap();
    assert_eq!(papyrus.strings.len(), 1);
    assert_eq!(papyrus.scripts.len(), 1);
    assert!(papyrus.script("Foo").is_some());

    let (eid, instance) = papyrus.script_instances.iter().next().unwrap();
    assert_eq!(eid.raw(), 0x1234);
    assert_eq!(instance.ref_id.raw(), 0x000001);
    assert_eq!(instance.definition, Link::Defined);
    assert!(instance.variables().is_empty());
    assert_eq!(save.registry().resolve(*eid), Referent::ScriptInstance);
    assert_eq!(papyrus.unattached_instances().count(), 0);
}

#[test]
fn every_variant_round_trips() {
    let mut le = Container::skyrim_le();
    le.papyrus = Some(PapyrusBlock::foo());

    let mut se = Container::skyrim_se();
    se.papyrus = Some(PapyrusBlock::foo());
    se.light_plugins = Some(vec!["ccBGSSSE001-Fish.esl".to_string()]);

    let mut fo4 = Container::fallout4();
    fo4.papyrus = Some(PapyrusBlock::foo().fallout4());

    for (container, game) in [(le, Game::SkyrimLe), (se, Game::SkyrimSe), (fo4, Game::Fallout4)] {
        let save = assert_round_trip(&container.build());
        assert_eq!(save.game, game);
        assert!(save.papyrus().unwrap().script("Foo").is_some());
    }
}

#[test]
fn compressed_special_edition_saves() {
    for compression in [Compression::Zlib, Compression::Lz4] {
        let mut container = Container::skyrim_se();
        container.compression = compression as u16;
        container.papyrus = Some(PapyrusBlock::foo());
        container.change_forms = change_form(0x400001, 0, 0, &[1, 2, 3]);
        container.change_form_count = 1;

        let save = assert_round_trip(&container.build());
        assert_eq!(save.header.compression, compression);
        assert_eq!(save.change_forms.len(), 1);
    }
}

#[test]
fn compression_does_not_change_the_body() {
    let mut plain = Container::skyrim_se();
    plain.papyrus = Some(PapyrusBlock::foo());
    let mut packed = plain.clone();
    packed.compression = Compression::Zlib as u16;

    let a = load(&plain.build());
    let b = load(&packed.build());
    // the compression field is part of the header bytes
    assert_ne!(a.digest, b.digest);
    assert_eq!(a.save.table3, b.save.table3);
    assert_eq!(a.save.location, b.save.location);
}

#[test]
fn save_writes_to_disk() {
    let mut container = Container::skyrim_le();
    container.papyrus = Some(PapyrusBlock::foo());
    let bytes = container.build();
    let loaded = load(&bytes);

    let path = std::env::temp_dir().join(format!("resave-round-trip-{}.ess", std::process::id()));
    let result = resave_core::save(&loaded.save, &path).unwrap();
    assert_eq!(result.bytes_written, bytes.len());
    assert_eq!(result.digest, loaded.digest);

    let reloaded = resave_core::load(&path, &LoadOptions::default()).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(reloaded.digest, loaded.digest);
}
