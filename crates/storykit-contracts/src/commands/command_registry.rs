#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

/// Commands whose whole remainder is kept verbatim under `text`.
pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "prompt",
        action: "set_prompt",
    },
    CommandSpec {
        command: "edit_prompt",
        action: "set_edit_prompt",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "story",
        action: "upload_story",
    },
    CommandSpec {
        command: "product",
        action: "upload_product",
    },
    CommandSpec {
        command: "edit_image",
        action: "set_edit_image",
    },
    CommandSpec {
        command: "save",
        action: "save",
    },
];

/// Commands naming a catalog entry by filename or 1-based position.
pub(crate) const CATALOG_KEY_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "story_model",
        action: "select_story_model",
    },
    CommandSpec {
        command: "product_item",
        action: "select_product",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "clear_story",
        action: "clear_story",
    },
    CommandSpec {
        command: "clear_product",
        action: "clear_product",
    },
    CommandSpec {
        command: "stitch",
        action: "stitch",
    },
    CommandSpec {
        command: "generate",
        action: "generate",
    },
    CommandSpec {
        command: "analyze",
        action: "analyze",
    },
    CommandSpec {
        command: "clear_edit_image",
        action: "clear_edit_image",
    },
    CommandSpec {
        command: "apply",
        action: "apply",
    },
    CommandSpec {
        command: "versions",
        action: "list_versions",
    },
    CommandSpec {
        command: "catalog",
        action: "catalog",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub(crate) const EDIT_COMMAND: &str = "edit";
pub(crate) const VERSION_COMMAND: &str = "version";

pub const STUDIO_HELP_COMMANDS: &[&str] = &[
    "/catalog",
    "/story_model <n|file>",
    "/story <path>",
    "/clear_story",
    "/product_item <n|file>",
    "/product <path>",
    "/clear_product",
    "/prompt <text>",
    "/stitch",
    "/generate",
    "/analyze",
    "/edit <n> [text]",
    "/edit_prompt <text>",
    "/edit_image <path>",
    "/clear_edit_image",
    "/apply",
    "/versions",
    "/version <n>",
    "/save [path]",
    "/status",
    "/help",
    "/quit",
];
