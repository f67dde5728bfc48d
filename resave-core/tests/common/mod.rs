//! Byte-level builders for synthetic saves. They lay bytes out by hand and
//! never call into the library's writers.
#![allow(dead_code)]

use std::io::Write;

/// Little-endian byte buffer.
#[derive(Debug, Default, Clone)]
pub struct Bytes(pub Vec<u8>);

impl Bytes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.0.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn f32(&mut self, v: f32) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn ref_id(&mut self, v: u32) -> &mut Self {
        self.0.extend_from_slice(&v.to_be_bytes()[1..]);
        self
    }

    pub fn wstring(&mut self, s: &str) -> &mut Self {
        self.u16(s.len() as u16);
        self.bytes(s.as_bytes())
    }

    pub fn bytes(&mut self, b: &[u8]) -> &mut Self {
        self.0.extend_from_slice(b);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

#[derive(Debug, Clone)]
pub struct ScriptSpec {
    pub name: u16,
    pub parent: u16,
    pub members: Vec<(u16, u16)>,
}

#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub eid: u64,
    pub script: u16,
    pub ref_id: u32,
    /// Encoded variables, one entry per member.
    pub variables: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct ArraySpec {
    pub eid: u64,
    pub element_type: u8,
    pub type_name: Option<u16>,
    pub elements: Vec<Vec<u8>>,
}

/// A Papyrus block with scripts, script instances, references and arrays.
/// Every other
/// table is empty.
#[derive(Debug, Clone)]
pub struct PapyrusBlock {
    pub eid_bytes: usize,
    pub fallout4: bool,
    pub header: u16,
    pub strings: Vec<String>,
    pub scripts: Vec<ScriptSpec>,
    pub instances: Vec<InstanceSpec>,
    /// World references as (eid, type name index), with empty bodies.
    pub references: Vec<(u64, u16)>,
    pub arrays: Vec<ArraySpec>,
    pub tail: Vec<u8>,
}

impl PapyrusBlock {
    /// String table `["Foo"]`, script `Foo`, one instance of it on RefID
    /// 0x000001 with no members.
    pub fn foo() -> Self {
        Self {
            eid_bytes: 4,
            fallout4: false,
            header: 3,
            strings: vec!["Foo".to_string()],
            scripts: vec![ScriptSpec {
                name: 0,
                parent: 0,
                members: Vec::new(),
            }],
            instances: vec![InstanceSpec {
                eid: 0x1234,
                script: 0,
                ref_id: 0x000001,
                variables: Vec::new(),
            }],
            references: Vec::new(),
            arrays: Vec::new(),
            tail: Vec::new(),
        }
    }

    pub fn fallout4(mut self) -> Self {
        self.eid_bytes = 8;
        self.fallout4 = true;
        self
    }

    fn eid(&self, b: &mut Bytes, eid: u64) {
        if self.eid_bytes == 8 {
            b.u64(eid);
        } else {
            b.u32(eid as u32);
        }
    }

    /// A reference variable (tag 1) in this block's EID width.
    pub fn ref_variable(&self, type_name: u16, eid: u64) -> Vec<u8> {
        let mut b = Bytes::new();
        b.u8(1).u16(type_name);
        self.eid(&mut b, eid);
        b.0
    }

    pub fn build(&self) -> Vec<u8> {
        let mut b = Bytes::new();
        b.u16(self.header);
        b.u16(self.strings.len() as u16);
        for s in &self.strings {
            b.wstring(s);
        }

        b.u32(self.scripts.len() as u32);
        for s in &self.scripts {
            b.u16(s.name).u16(s.parent).u32(s.members.len() as u32);
            for (name, ty) in &s.members {
                b.u16(*name).u16(*ty);
            }
        }
        if self.fallout4 {
            b.u32(0);
        }

        b.u32(self.instances.len() as u32);
        for i in &self.instances {
            self.eid(&mut b, i.eid);
            b.u16(i.script).u16(0).u16(0).ref_id(i.ref_id).u8(0);
        }
        b.u32(self.references.len() as u32);
        for (eid, type_name) in &self.references {
            self.eid(&mut b, *eid);
            b.u16(*type_name);
        }
        if self.fallout4 {
            b.u32(0);
        }
        b.u32(self.arrays.len() as u32);
        for a in &self.arrays {
            self.eid(&mut b, a.eid);
            b.u8(a.element_type);
            if let Some(t) = a.type_name {
                b.u16(t);
            }
            b.u32(a.elements.len() as u32);
        }
        // runtime, active scripts
        b.u32(0x0100).u32(0);

        for i in &self.instances {
            self.eid(&mut b, i.eid);
            b.u8(0).u16(i.script).u32(0).u32(i.variables.len() as u32);
            for v in &i.variables {
                b.bytes(v);
            }
        }
        for (eid, type_name) in &self.references {
            self.eid(&mut b, *eid);
            b.u8(0).u16(*type_name).u32(0).u32(0).u32(0);
        }
        for a in &self.arrays {
            self.eid(&mut b, a.eid);
            for e in &a.elements {
                b.bytes(e);
            }
        }

        // function messages, suspended stacks, trailer
        b.u32(0).u32(0).u32(0);
        b.u32(0).u32(0).u32(0);
        if self.fallout4 {
            b.u16(1);
        }
        b.bytes(&self.tail);
        b.0
    }
}

/// A whole save file.
#[derive(Debug, Clone)]
pub struct Container {
    pub magic: &'static [u8],
    pub version: u32,
    pub bpp: usize,
    /// Written into the header by Skyrim SE only. 0 none, 1 zlib, 2 lz4.
    pub compression: u16,
    pub form_version: u8,
    pub game_version: Option<String>,
    pub plugins: Vec<String>,
    pub light_plugins: Option<Vec<String>>,
    pub shot: (u32, u32),
    pub table1: Vec<(u32, Vec<u8>)>,
    pub table2: Vec<(u32, Vec<u8>)>,
    /// Encoded change form entries and the count stored for them.
    pub change_forms: Vec<u8>,
    pub change_form_count: u32,
    pub papyrus: Option<PapyrusBlock>,
    /// Added to the table 3 count written into the file location table.
    pub table3_count_delta: i32,
    pub form_ids: Vec<u32>,
    pub visited: Vec<u32>,
    pub unknown3: Vec<u8>,
    /// Added to the global data table 1 offset.
    pub offset_drift: u32,
}

impl Container {
    pub fn skyrim_le() -> Self {
        Self {
            magic: b"TESV_SAVEGAME",
            version: 9,
            bpp: 3,
            compression: 0,
            form_version: 74,
            game_version: None,
            plugins: vec!["Skyrim.esm".to_string(), "Update.esm".to_string()],
            light_plugins: None,
            shot: (2, 1),
            table1: vec![(0, misc_stats(&[("Quests Completed", 0, 3)]))],
            table2: vec![(100, vec![1, 2, 3, 4])],
            change_forms: Vec::new(),
            change_form_count: 0,
            papyrus: None,
            table3_count_delta: 0,
            form_ids: vec![0x0100_0D62],
            visited: vec![0x3C],
            unknown3: vec![9, 9],
            offset_drift: 0,
        }
    }

    pub fn skyrim_se() -> Self {
        Self {
            version: 12,
            bpp: 4,
            form_version: 78,
            light_plugins: Some(Vec::new()),
            ..Self::skyrim_le()
        }
    }

    pub fn fallout4() -> Self {
        Self {
            magic: b"FO4_SAVEGAME",
            version: 15,
            bpp: 4,
            form_version: 68,
            game_version: Some("1.10.163.0".to_string()),
            plugins: vec!["Fallout4.esm".to_string()],
            light_plugins: Some(Vec::new()),
            ..Self::skyrim_le()
        }
    }

    fn has_compression_field(&self) -> bool {
        self.magic == b"TESV_SAVEGAME" && self.version >= 12
    }

    pub fn header(&self) -> Vec<u8> {
        let mut fields = Bytes::new();
        fields
            .u32(self.version)
            .u32(7)
            .wstring("Prisoner")
            .u32(3)
            .wstring("Helgen")
            .wstring("000.00.01")
            .wstring("NordRace")
            .u16(0)
            .f32(12.5)
            .f32(300.0)
            .u64(0x01D5_0000_0000_0000)
            .u32(self.shot.0)
            .u32(self.shot.1);
        if self.has_compression_field() {
            fields.u16(self.compression);
        }

        let mut b = Bytes::new();
        b.bytes(self.magic).u32(fields.len() as u32).bytes(&fields.0);
        let shot_len = self.shot.0 as usize * self.shot.1 as usize * self.bpp;
        b.bytes(&(0..shot_len).map(|i| i as u8).collect::<Vec<_>>());
        b.0
    }

    fn table3(&self) -> Vec<(u32, Vec<u8>)> {
        self.papyrus
            .iter()
            .map(|p| (1001, p.build()))
            .collect()
    }

    /// The uncompressed body.
    pub fn body(&self, header_len: usize) -> Vec<u8> {
        let mut plugins = Bytes::new();
        plugins.u8(self.plugins.len() as u8);
        for p in &self.plugins {
            plugins.wstring(p);
        }
        if let Some(light) = &self.light_plugins {
            plugins.u16(light.len() as u16);
            for p in light {
                plugins.wstring(p);
            }
        }

        let mut pre = Bytes::new();
        pre.u8(self.form_version);
        if let Some(v) = &self.game_version {
            pre.wstring(v);
        }
        pre.u32(plugins.len() as u32).bytes(&plugins.0);

        let globals = |entries: &[(u32, Vec<u8>)]| {
            let mut b = Bytes::new();
            for (kind, data) in entries {
                b.u32(*kind).u32(data.len() as u32).bytes(data);
            }
            b.0
        };
        let table3_entries = self.table3();
        let t1 = globals(&self.table1);
        let t2 = globals(&self.table2);
        let t3 = globals(&table3_entries);

        let t1_at = header_len + pre.len() + 100;
        let t2_at = t1_at + t1.len();
        let cf_at = t2_at + t2.len();
        let t3_at = cf_at + self.change_forms.len();
        let fid_at = t3_at + t3.len();
        let u3_at = fid_at + 4 + 4 * self.form_ids.len() + 4 + 4 * self.visited.len();

        let mut b = pre;
        b.u32(fid_at as u32)
            .u32(u3_at as u32)
            .u32(t1_at as u32 + self.offset_drift)
            .u32(t2_at as u32)
            .u32(cf_at as u32)
            .u32(t3_at as u32)
            .u32(self.table1.len() as u32)
            .u32(self.table2.len() as u32)
            .u32((table3_entries.len() as i32 + self.table3_count_delta) as u32)
            .u32(self.change_form_count);
        for _ in 0..15 {
            b.u32(0);
        }
        b.bytes(&t1).bytes(&t2).bytes(&self.change_forms).bytes(&t3);
        b.u32(self.form_ids.len() as u32);
        for f in &self.form_ids {
            b.u32(*f);
        }
        b.u32(self.visited.len() as u32);
        for v in &self.visited {
            b.u32(*v);
        }
        b.u32(self.unknown3.len() as u32).bytes(&self.unknown3);
        b.0
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = self.header();
        let body = self.body(out.len());
        match self.compression {
            1 if self.has_compression_field() => {
                let packed = zlib(&body);
                out.extend_from_slice(&(body.len() as u32).to_le_bytes());
                out.extend_from_slice(&(packed.len() as u32).to_le_bytes());
                out.extend_from_slice(&packed);
            }
            2 if self.has_compression_field() => {
                let packed = lz4_flex::block::compress(&body);
                out.extend_from_slice(&(body.len() as u32).to_le_bytes());
                out.extend_from_slice(&(packed.len() as u32).to_le_bytes());
                out.extend_from_slice(&packed);
            }
            _ => out.extend_from_slice(&body),
        }
        out
    }
}

fn zlib(bytes: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(bytes).unwrap();
    enc.finish().unwrap()
}

/// Global data type 0 payload.
pub fn misc_stats(stats: &[(&str, u8, i32)]) -> Vec<u8> {
    let mut b = Bytes::new();
    b.u32(stats.len() as u32);
    for (name, category, value) in stats {
        b.wstring(name).u8(*category).u32(*value as u32);
    }
    b.0
}

/// One change form entry with 8-bit lengths and an uncompressed body.
pub fn change_form(ref_id: u32, flags: u32, type_code: u8, body: &[u8]) -> Vec<u8> {
    let mut b = Bytes::new();
    b.ref_id(ref_id)
        .u32(flags)
        .u8(type_code)
        .u8(74)
        .u8(body.len() as u8)
        .u8(0)
        .bytes(body);
    b.0
}
