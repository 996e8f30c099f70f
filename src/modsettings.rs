use crate::{
    error::{ModError, ModResult},
    library::ModRecord,
    lsx::{self, Document, Element, LsxError},
};
use anyhow::{Context, Result};
use std::{collections::HashSet, fs, path::Path};

/// Version64 for 1.0.0.0, used when a manifest carries no usable version.
pub const DEFAULT_VERSION64: &str = "36028797018963968";

pub const DEFAULT_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<save>
    <version major="4" minor="8" revision="0" build="500" />
    <region id="ModuleSettings">
        <node id="root">
            <children>
                <node id="Mods">
                    <children>
                        <node id="ModuleShortDesc">
                            <attribute id="Folder" type="LSString" value="GustavX" />
                            <attribute id="MD5" type="LSString" value="" />
                            <attribute id="Name" type="LSString" value="GustavX" />
                            <attribute id="PublishHandle" type="uint64" value="0" />
                            <attribute id="UUID" type="guid" value="cb555efe-2d9e-131f-8195-a89329d218ea" />
                            <attribute id="Version64" type="int64" value="36028797018963968" />
                        </node>
                    </children>
                </node>
            </children>
        </node>
    </region>
</save>
"#;

const MOD_ORDER: &str = "ModOrder";
const MODS: &str = "Mods";

pub fn read_template(path: &Path) -> ModResult<Document> {
    let unreadable = |reason: String| {
        tracing::error!("settings template {} unreadable: {reason}", path.display());
        ModError::TemplateUnreadable {
            path: path.to_path_buf(),
            reason,
        }
    };
    let raw = fs::read_to_string(path).map_err(|err| unreadable(err.to_string()))?;
    lsx::parse(&raw).map_err(|err| unreadable(err.to_string()))
}

/// Builds the settings document for `mods`, which must be enabled and in load order.
///
/// Generated entries follow the template's own entries in both sections. With no mods
/// the template is rendered untouched, which is what "restore defaults" writes.
pub fn synthesize(template: &Document, mods: &[ModRecord]) -> Result<String, LsxError> {
    if mods.is_empty() {
        return template.render();
    }

    let mut doc = template.clone();
    let uuids: HashSet<&str> = mods.iter().map(|record| record.uuid.as_str()).collect();
    let children = root_children(&mut doc.root);

    let mods_index = children
        .children
        .iter()
        .position(|child| child.name == "node" && child.id() == Some(MODS))
        .unwrap_or(children.children.len());
    let order_list = section(children, MOD_ORDER, mods_index);
    order_list
        .children
        .retain(|node| !node_uuid(node).is_some_and(|uuid| uuids.contains(uuid)));
    order_list
        .children
        .extend(mods.iter().map(|record| module_order_node(&record.uuid)));

    let mods_list = section(children, MODS, usize::MAX);
    mods_list
        .children
        .retain(|node| !node_uuid(node).is_some_and(|uuid| uuids.contains(uuid)));
    mods_list
        .children
        .extend(mods.iter().map(module_short_desc));

    doc.render()
}

/// UUIDs listed under `Mods` in a settings file, in document order.
pub fn listed_uuids(doc: &Document) -> Vec<String> {
    doc.root
        .child("region", Some("ModuleSettings"))
        .and_then(|region| region.child("node", Some("root")))
        .and_then(|root| root.child("children", None))
        .and_then(|children| children.child("node", Some(MODS)))
        .and_then(|mods| mods.child("children", None))
        .map(|children| {
            children
                .children
                .iter()
                .filter_map(node_uuid)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn root_children(save: &mut Element) -> &mut Element {
    let region = save.child_or_insert(
        "region",
        Some("ModuleSettings"),
        usize::MAX,
        Element::new("region").with_attr("id", "ModuleSettings"),
    );
    let root = region.child_or_insert("node", Some("root"), usize::MAX, Element::node("root"));
    root.child_or_insert("children", None, usize::MAX, Element::new("children"))
}

fn section<'a>(children: &'a mut Element, id: &str, position: usize) -> &'a mut Element {
    let node = children.child_or_insert("node", Some(id), position, Element::node(id));
    node.child_or_insert("children", None, usize::MAX, Element::new("children"))
}

fn node_uuid(node: &Element) -> Option<&str> {
    node.attribute_value("UUID")
}

fn module_order_node(uuid: &str) -> Element {
    Element::node("Module").with_child(Element::attribute("UUID", "FixedString", uuid))
}

fn module_short_desc(record: &ModRecord) -> Element {
    Element::node("ModuleShortDesc")
        .with_child(Element::attribute("Folder", "LSString", &record.folder))
        .with_child(Element::attribute("MD5", "LSString", &record.md5))
        .with_child(Element::attribute("Name", "LSString", &record.name))
        .with_child(Element::attribute("PublishHandle", "uint64", "0"))
        .with_child(Element::attribute("UUID", "guid", &record.uuid))
        .with_child(Element::attribute(
            "Version64",
            "int64",
            &version64(record.version.as_deref()),
        ))
}

fn version64(version: Option<&str>) -> String {
    version
        .map(str::trim)
        .and_then(|value| value.parse::<i64>().ok())
        .map(|value| value.to_string())
        .unwrap_or_else(|| DEFAULT_VERSION64.to_string())
}

/// Makes sure a template exists, capturing the live file on first run.
pub fn seed_template(template_path: &Path, live_path: &Path) -> Result<bool> {
    if template_path.exists() {
        return Ok(false);
    }
    let seed = match fs::read_to_string(live_path) {
        Ok(raw) if lsx::parse(&raw).is_ok() => {
            tracing::info!("seeding settings template from {}", live_path.display());
            raw
        }
        _ => {
            tracing::info!("seeding settings template from built-in defaults");
            DEFAULT_TEMPLATE.to_string()
        }
    };
    write_atomic_text(template_path, &seed).context("write settings template")?;
    Ok(true)
}

pub fn write_atomic_text(path: &Path, contents: &str) -> Result<()> {
    let parent = path.parent().context("modsettings parent")?;
    fs::create_dir_all(parent).context("create modsettings dir")?;
    let file_name = path.file_name().context("modsettings filename")?;
    let mut temp_name = std::ffi::OsString::from(file_name);
    temp_name.push(".tmp");
    let mut temp_path = parent.join(temp_name);
    if temp_path.exists() {
        let stamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let mut temp_name = std::ffi::OsString::from(file_name);
        temp_name.push(format!(".{stamp}.tmp"));
        temp_path = parent.join(temp_name);
    }
    fs::write(&temp_path, contents).context("write modsettings temp")?;
    fs::rename(&temp_path, path).context("finalize modsettings")?;
    Ok(())
}
