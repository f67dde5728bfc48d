use resave_core::papyrus::table::Link;
use resave_core::{Diagnostic, Papyrus, SaveFile, SizeReport};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HeaderSummary {
    pub game: String,
    pub version: u32,
    pub save_number: u32,
    pub player: String,
    pub level: u32,
    pub location: String,
    pub game_date: String,
    pub race: String,
    pub screenshot: String,
    pub compression: String,
    pub form_version: u8,
    pub game_version: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ScriptSummary {
    pub name: String,
    pub parent: Option<String>,
    pub members: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PapyrusSummary {
    pub strings: usize,
    pub large_string_table: bool,
    pub scripts: Vec<ScriptSummary>,
    pub script_instances: usize,
    pub unattached_instances: usize,
    pub references: usize,
    pub struct_instances: usize,
    pub arrays: usize,
    pub active_scripts: usize,
    pub function_messages: usize,
    pub suspended_stacks: usize,
    pub undefined_references: usize,
    pub truncated: bool,
    pub string_table_bug: bool,
    pub failure: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChangeFormSummary {
    pub ref_id: String,
    pub form_id: Option<String>,
    pub plugin: Option<String>,
    pub form_type: String,
    pub flags: String,
    pub length: usize,
    pub compressed: bool,
}

#[derive(Debug, Serialize)]
pub struct SaveSummary {
    pub header: HeaderSummary,
    pub plugins: Vec<String>,
    pub light_plugins: Vec<String>,
    pub global_data: Vec<u32>,
    pub change_forms: Vec<ChangeFormSummary>,
    pub corrupt_change_forms: usize,
    pub papyrus: Option<PapyrusSummary>,
    pub sizes: SizeReport,
    pub diagnostics: Vec<Diagnostic>,
    pub truncated: bool,
}

fn papyrus_summary(p: &Papyrus) -> PapyrusSummary {
    let scripts = p
        .scripts
        .iter()
        .map(|(name, script)| ScriptSummary {
            name: p.strings.text(*name),
            parent: match script.parent {
                Link::Absent => None,
                _ => Some(p.strings.text(script.parent_name)),
            },
            members: script
                .members
                .iter()
                .map(|m| format!("{} {}", p.strings.text(m.type_name), p.strings.text(m.name)))
                .collect(),
        })
        .collect();

    PapyrusSummary {
        strings: p.strings.len(),
        large_string_table: p.strings.is_large(),
        scripts,
        script_instances: p.script_instances.len(),
        unattached_instances: p.unattached_instances().count(),
        references: p.references.len(),
        struct_instances: p.struct_instances.len(),
        arrays: p.arrays.len(),
        active_scripts: p.active_scripts.len(),
        function_messages: p.function_messages.len(),
        suspended_stacks: p.suspended_stacks1.len() + p.suspended_stacks2.len(),
        undefined_references: p.undefined_reference_count(),
        truncated: p.truncated,
        string_table_bug: p.string_table_bug,
        failure: p.failure.clone(),
    }
}

impl SaveSummary {
    pub fn new(save: &SaveFile, parallel_threshold: usize) -> Self {
        let h = &save.header;
        let header = HeaderSummary {
            game: save.game.to_string(),
            version: h.version,
            save_number: h.save_number,
            player: save.text(&h.player_name),
            level: h.level,
            location: save.text(&h.location),
            game_date: save.text(&h.game_date),
            race: save.text(&h.race),
            screenshot: format!("{}x{}", h.shot_width, h.shot_height),
            compression: h.compression.to_string(),
            form_version: save.form_version,
            game_version: save.game_version.as_ref().map(|v| save.text(v)),
        };

        let change_forms = save
            .change_forms
            .forms()
            .map(|f| ChangeFormSummary {
                ref_id: f.ref_id.to_string(),
                form_id: save.form_id_for(f.ref_id).map(|id| format!("{:08X}", id)),
                plugin: save.plugin_for(f.ref_id).map(|p| save.text(p)),
                form_type: f
                    .form_type()
                    .map_or_else(|| format!("unknown ({})", f.type_code()), |t| t.to_string()),
                flags: format!("{:08X}", f.change_flags.bits()),
                length: f.raw_data().len(),
                compressed: f.is_compressed(),
            })
            .collect();

        Self {
            header,
            plugins: save.plugins.full.iter().map(|p| save.text(p)).collect(),
            light_plugins: save
                .plugins
                .light
                .iter()
                .flatten()
                .map(|p| save.text(p))
                .collect(),
            global_data: save
                .table1
                .iter()
                .chain(&save.table2)
                .chain(&save.table3)
                .map(|g| g.kind)
                .collect(),
            change_forms,
            corrupt_change_forms: save.change_forms.corrupt_spans().count(),
            papyrus: save.papyrus().map(papyrus_summary),
            sizes: SizeReport::of_save(save, parallel_threshold),
            diagnostics: save.diagnostics().entries().to_vec(),
            truncated: save.is_truncated(),
        }
    }
}
