mod common;

use common::{change_form, Bytes, Container};
use pretty_assertions::assert_eq;
use resave_core::changeform::{ChangeFlags, ChangeFormEntry};
use resave_core::{ChangeFormData, ChangeFormType, Diagnostic, LoadOptions, SaveFile};

fn load(bytes: &[u8]) -> resave_core::LoadResult {
    SaveFile::from_bytes(bytes, &LoadOptions::default()).unwrap()
}

fn ref_id(save: &SaveFile, raw: u32) -> resave_core::RefId {
    save.change_forms
        .forms()
        .map(|f| f.ref_id)
        .find(|r| r.raw() == raw)
        .unwrap()
}

#[test]
fn corrupt_entry_does_not_stop_the_load() {
    let good1 = change_form(0x400001, 0, 0, &[0xAA; 4]);
    let mut bad = change_form(0x400002, 0, 0, &[0xBB; 4]);
    bad[9] = 0xF0;
    let good2 = change_form(0x400003, 0, 0, &[0xCC; 6]);

    let mut container = Container::skyrim_le();
    container.change_forms = [good1.clone(), bad.clone(), good2].concat();
    container.change_form_count = 3;
    let bytes = container.build();

    let loaded = load(&bytes);
    assert!(!loaded.truncated);
    let save = &loaded.save;
    assert_eq!(save.change_forms.len(), 3);
    assert_eq!(save.change_forms.forms().count(), 2);
    assert!(matches!(save.change_forms.entries()[1], ChangeFormEntry::Corrupt(_)));
    assert!(save
        .diagnostics()
        .entries()
        .iter()
        .any(|d| matches!(d, Diagnostic::ChangeFormResync { index: 1, skipped: 15, .. })));

    // the corrupt bytes are written back as they were
    assert_eq!(save.to_bytes().unwrap(), bytes);
}

#[test]
fn unrecoverable_framing_refuses_to_write() {
    let good = change_form(0x400001, 0, 0, &[0xAA; 4]);
    let mut bad = change_form(0x400002, 0, 0, &[0xBB; 4]);
    bad[9] = 0xF0;

    let mut container = Container::skyrim_le();
    container.change_forms = [good, bad].concat();
    container.change_form_count = 4;
    let loaded = load(&container.build());

    assert!(loaded.truncated);
    assert_eq!(loaded.save.change_forms.forms().count(), 1);
    let err = loaded.save.to_bytes().unwrap_err();
    assert!(matches!(err, resave_core::Error::Truncated));
}

#[test]
fn unknown_type_decodes_to_opaque() {
    let mut container = Container::skyrim_le();
    container.change_forms = change_form(0x400010, 0, 0x3F, &[1, 2, 3, 4, 5, 6, 7]);
    container.change_form_count = 1;
    let mut save = load(&container.build()).save;

    let r = ref_id(&save, 0x400010);
    let form = save.change_forms.get(r).unwrap();
    assert_eq!(form.form_type(), None);
    assert_eq!(form.byte_size(), 11 + 7);

    let body = save.decode_change_form(r).unwrap();
    assert!(body.is_opaque());
    assert_eq!(body.byte_size(), 7);
    assert_eq!(body.encode().unwrap(), vec![1, 2, 3, 4, 5, 6, 7]);
}

#[test]
fn edited_form_list_is_saved() {
    let flags = ChangeFlags::LIST_CONTENT.bits();
    // one form: 0x400020
    let body = [1, 0, 0, 0, 0x40, 0x00, 0x20];
    let mut container = Container::skyrim_le();
    container.change_forms = change_form(0x400011, flags, ChangeFormType::Flst as u8, &body);
    container.change_form_count = 1;
    let mut save = load(&container.build()).save;

    let r = ref_id(&save, 0x400011);
    let mut data = save.decode_change_form(r).unwrap();
    match &mut data {
        ChangeFormData::FormList(list) => {
            let forms = list.forms.as_mut().unwrap();
            assert_eq!(forms.len(), 1);
            forms.clear();
        }
        other => panic!("expected a form list, got {:?}", other),
    }
    save.change_forms.get_mut(r).unwrap().set_body(&data).unwrap();

    let reloaded = load(&save.to_bytes().unwrap()).save;
    let form = reloaded.change_forms.get(r).unwrap();
    assert_eq!(form.raw_data(), &[0, 0, 0, 0]);
    assert_eq!(reloaded.location.change_form_count, 1);
}

/// A 15-byte entry whose inner bytes never start a plausible frame.
fn dense_form(ref_id: u32) -> Vec<u8> {
    let mut b = Bytes::new();
    b.ref_id(ref_id)
        .u32(0xFFFF_FFFF)
        .u8(0)
        .u8(0xFF)
        .u8(4)
        .u8(0)
        .bytes(&[0xFF; 4]);
    b.0
}

#[test]
fn resync_before_a_long_tail() {
    const TAIL: u32 = 4000;
    let mut bad = dense_form(0xC00002);
    bad[7] = 0xC0; // no such length width
    let mut region = bad.clone();
    for i in 0..TAIL {
        region.extend_from_slice(&dense_form(0xC0_0000 | (0x100 + i)));
    }

    let mut container = Container::skyrim_le();
    container.change_forms = region;
    container.change_form_count = TAIL + 1;
    let bytes = container.build();

    let loaded = load(&bytes);
    assert!(!loaded.truncated);
    let save = &loaded.save;
    assert_eq!(save.change_forms.len(), TAIL as usize + 1);
    assert_eq!(save.change_forms.forms().count(), TAIL as usize);
    assert_eq!(save.change_forms.corrupt_spans().next().unwrap().bytes, bad);
    assert_eq!(save.to_bytes().unwrap(), bytes);
}
