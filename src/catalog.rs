use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

/// Which wrapper a block's textual form sits inside, and therefore where it
/// may legally appear: statements stand alone, reporters live in `( )`,
/// predicates in `< >`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Stack,
    Reporter,
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Text,
    Number,
    Boolean,
    Color,
    Broadcast,
    Dropdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapKind {
    None,
    Substack,
    SubstackElse,
}

#[derive(Debug, Clone)]
pub enum Segment {
    Word(String),
    Slot { name: String, kind: SlotKind },
}

#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub opcode: &'static str,
    pub flavor: Flavor,
    pub wrap: WrapKind,
    pub segments: Vec<Segment>,
    pub is_menu: bool,
    literal_len: usize,
    slot_count: usize,
}

impl CatalogEntry {
    pub fn slot_kind(&self, slot: &str) -> Option<SlotKind> {
        self.segments.iter().find_map(|segment| match segment {
            Segment::Slot { name, kind } if name == slot => Some(*kind),
            _ => None,
        })
    }
}

/// Shape of one statement piece as seen by the matcher. Dropdown pieces are
/// distinguished because some patterns differ only by a `[ v]` slot
/// (`length of [list v]` vs `length of [text]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceShape<'a> {
    Word(&'a str),
    Dropdown,
    Slot,
}

/// One block shape per opcode, authored as a scratchblocks format string.
/// `{NAME}` is an input slot, `[{NAME} v]` a bracket dropdown, `({NAME} v)`
/// a round dropdown; a leading `(`/`<` marks reporter/predicate flavor.
const BLOCK_FORMATS: &[(&str, &str)] = &[
    // Events
    ("event_whenflagclicked", "when green flag clicked"),
    ("event_whenkeypressed", "when [{KEY_OPTION} v] key pressed"),
    ("event_whenthisspriteclicked", "when this sprite clicked"),
    (
        "event_whenbackdropswitchesto",
        "when backdrop switches to [{BACKDROP} v]",
    ),
    (
        "event_whengreaterthan",
        "when [{WHENGREATERTHANMENU} v] > {VALUE}",
    ),
    (
        "event_whenbroadcastreceived",
        "when I receive [{BROADCAST_OPTION} v]",
    ),
    ("event_broadcast", "broadcast {BROADCAST_INPUT}"),
    ("event_broadcastandwait", "broadcast {BROADCAST_INPUT} and wait"),
    // Motion
    ("motion_movesteps", "move {STEPS} steps"),
    ("motion_turnright", "turn right {DEGREES} degrees"),
    ("motion_turnleft", "turn left {DEGREES} degrees"),
    ("motion_goto", "go to {TO}"),
    ("motion_goto_menu", "[{TO} v]"),
    ("motion_gotoxy", "go to x: {X} y: {Y}"),
    ("motion_glideto", "glide {SECS} secs to {TO}"),
    ("motion_glideto_menu", "[{TO} v]"),
    ("motion_glidesecstoxy", "glide {SECS} secs to x: {X} y: {Y}"),
    ("motion_pointindirection", "point in direction {DIRECTION}"),
    ("motion_pointtowards", "point towards {TOWARDS}"),
    ("motion_pointtowards_menu", "[{TOWARDS} v]"),
    ("motion_changexby", "change x by {DX}"),
    ("motion_setx", "set x to {X}"),
    ("motion_changeyby", "change y by {DY}"),
    ("motion_sety", "set y to {Y}"),
    ("motion_ifonedgebounce", "if on edge, bounce"),
    ("motion_setrotationstyle", "set rotation style [{STYLE} v]"),
    ("motion_xposition", "(x position)"),
    ("motion_yposition", "(y position)"),
    ("motion_direction", "(direction)"),
    // Looks
    ("looks_sayforsecs", "say {MESSAGE} for {SECS} seconds"),
    ("looks_say", "say {MESSAGE}"),
    ("looks_thinkforsecs", "think {MESSAGE} for {SECS} seconds"),
    ("looks_think", "think {MESSAGE}"),
    ("looks_switchcostumeto", "switch costume to {COSTUME}"),
    ("looks_nextcostume", "next costume"),
    ("looks_switchbackdropto", "switch backdrop to {BACKDROP}"),
    ("looks_backdrops", "[{BACKDROP} v]"),
    ("looks_costumenumbername", "(costume [{NUMBER_NAME} v])"),
    ("looks_backdropnumbername", "(backdrop [{NUMBER_NAME} v])"),
    ("looks_costume", "[{COSTUME} v]"),
    ("looks_nextbackdrop", "next backdrop"),
    ("looks_changesizeby", "change size by {CHANGE}"),
    ("looks_setsizeto", "set size to {SIZE} %"),
    ("looks_changeeffectby", "change [{EFFECT} v] effect by {CHANGE}"),
    ("looks_seteffectto", "set [{EFFECT} v] effect to {VALUE}"),
    ("looks_cleargraphiceffects", "clear graphic effects"),
    ("looks_show", "show"),
    ("looks_hide", "hide"),
    ("looks_gotofrontback", "go to [{FRONT_BACK} v] layer"),
    (
        "looks_goforwardbackwardlayers",
        "go [{FORWARD_BACKWARD} v] {NUM} layers",
    ),
    ("looks_size", "(size)"),
    // Sound
    ("sound_playuntildone", "play sound {SOUND_MENU} until done"),
    ("sound_play", "start sound {SOUND_MENU}"),
    ("sound_stopallsounds", "stop all sounds"),
    ("sound_changeeffectby", "change [{EFFECT} v] effect by {VALUE}"),
    ("sound_seteffectto", "set [{EFFECT} v] effect to {VALUE}"),
    ("sound_changevolumeby", "change volume by {VOLUME}"),
    ("sound_setvolumeto", "set volume to {VOLUME} %"),
    ("sound_cleareffects", "clear sound effects"),
    ("sound_volume", "(volume)"),
    ("sound_sounds_menu", "[{SOUND_MENU} v]"),
    // Pen
    ("pen_clear", "erase all"),
    ("pen_stamp", "stamp"),
    ("pen_penup", "pen up"),
    ("pen_pendown", "pen down"),
    ("pen_setpenparamto", "set pen ({COLOR_PARAM} v) to {VALUE}"),
    ("pen_changepenparamby", "change pen ({COLOR_PARAM} v) by {VALUE}"),
    (
        "pen_changePenColorParamBy",
        "change pen ({COLOR_PARAM} v) by {VALUE}",
    ),
    ("pen_setpencolortocolor", "set pen color to {COLOR}"),
    ("pen_changepensizeby", "change pen size by {SIZE}"),
    ("pen_changePenSizeBy", "change pen size by {SIZE}"),
    ("pen_setpensizeto", "set pen size to {SIZE}"),
    ("pen_setPenColorToColor", "set pen color to {COLOR}"),
    ("pen_setPenSizeTo", "set pen size to {SIZE}"),
    ("pen_penUp", "pen up"),
    ("pen_penDown", "pen down"),
    ("pen_setPenColorParamTo", "set pen ({COLOR_PARAM} v) to {VALUE}"),
    ("pen_menu_colorParam", "{colorParam}"),
    // Control
    ("control_wait", "wait {DURATION} seconds"),
    ("control_repeat", "repeat {TIMES}"),
    ("control_forever", "forever"),
    ("control_if", "if {CONDITION} then"),
    ("control_if_else", "if {CONDITION} then"),
    ("control_wait_until", "wait until {CONDITION}"),
    ("control_repeat_until", "repeat until {CONDITION}"),
    ("control_while", "while {CONDITION}"),
    ("control_stop", "stop [{STOP_OPTION} v]"),
    ("control_start_as_clone", "when I start as a clone"),
    ("control_create_clone_of", "create clone of {CLONE_OPTION}"),
    ("control_create_clone_of_menu", "[{CLONE_OPTION} v]"),
    ("control_delete_this_clone", "delete this clone"),
    // Sensing
    ("sensing_touchingobject", "<touching {TOUCHINGOBJECTMENU} ?>"),
    ("sensing_touchingobjectmenu", "[{TOUCHINGOBJECTMENU} v]"),
    ("sensing_touchingcolor", "<touching color {COLOR} ?>"),
    (
        "sensing_coloristouchingcolor",
        "<color {COLOR} is touching {COLOR2} ?>",
    ),
    ("sensing_distanceto", "(distance to {DISTANCETOMENU})"),
    ("sensing_distancetomenu", "[{DISTANCETOMENU} v]"),
    ("sensing_askandwait", "ask {QUESTION} and wait"),
    ("sensing_answer", "(answer)"),
    ("sensing_keypressed", "<key [{KEY_OPTION} v] pressed?>"),
    ("sensing_keyoptions", "{KEY_OPTION}"),
    ("sensing_mousedown", "<mouse down?>"),
    ("sensing_mousex", "(mouse x)"),
    ("sensing_mousey", "(mouse y)"),
    ("sensing_setdragmode", "set drag mode [{DRAG_MODE} v]"),
    ("sensing_loudness", "(loudness)"),
    ("sensing_timer", "(timer)"),
    ("sensing_resettimer", "reset timer"),
    ("sensing_of", "([{PROPERTY} v] of {OBJECT})"),
    ("sensing_of_object_menu", "[{OBJECT} v]"),
    ("sensing_current", "(current [{CURRENTMENU} v])"),
    ("sensing_dayssince2000", "(days since 2000)"),
    ("sensing_username", "(username)"),
    // Operators
    ("operator_add", "({NUM1} + {NUM2})"),
    ("operator_subtract", "({NUM1} - {NUM2})"),
    ("operator_multiply", "({NUM1} * {NUM2})"),
    ("operator_divide", "({NUM1} / {NUM2})"),
    ("operator_random", "(pick random {FROM} to {TO})"),
    ("operator_gt", "<{OPERAND1} > {OPERAND2}>"),
    ("operator_lt", "<{OPERAND1} < {OPERAND2}>"),
    ("operator_equals", "<{OPERAND1} = {OPERAND2}>"),
    ("operator_and", "<{OPERAND1} and {OPERAND2}>"),
    ("operator_or", "<{OPERAND1} or {OPERAND2}>"),
    ("operator_not", "<not {OPERAND}>"),
    ("operator_join", "(join {STRING1} {STRING2})"),
    ("operator_letter_of", "(letter {LETTER} of {STRING})"),
    ("operator_length", "(length of {STRING})"),
    ("operator_contains", "<{STRING1} contains {STRING2} ?>"),
    ("operator_mod", "({NUM1} mod {NUM2})"),
    ("operator_round", "(round {NUM})"),
    ("operator_mathop", "([{OPERATOR} v] of {NUM})"),
    // Variables and lists
    ("data_variable", "({VARIABLE})"),
    ("data_setvariableto", "set [{VARIABLE} v] to {VALUE}"),
    ("data_changevariableby", "change [{VARIABLE} v] by {VALUE}"),
    ("data_showvariable", "show variable [{VARIABLE} v]"),
    ("data_hidevariable", "hide variable [{VARIABLE} v]"),
    ("data_listcontents", "({LIST})"),
    ("data_addtolist", "add {ITEM} to [{LIST} v]"),
    ("data_deleteoflist", "delete {INDEX} of [{LIST} v]"),
    ("data_deletealloflist", "delete all of [{LIST} v]"),
    ("data_insertatlist", "insert {ITEM} at {INDEX} of [{LIST} v]"),
    (
        "data_replaceitemoflist",
        "replace item {INDEX} of [{LIST} v] with {ITEM}",
    ),
    ("data_itemoflist", "(item {INDEX} of [{LIST} v])"),
    ("data_itemnumoflist", "(item # of {ITEM} in [{LIST} v])"),
    ("data_lengthoflist", "(length of [{LIST} v])"),
    ("data_listcontainsitem", "<[{LIST} v] contains {ITEM} ?>"),
    ("data_showlist", "show list [{LIST} v]"),
    ("data_hidelist", "hide list [{LIST} v]"),
];

/// Placeholders stored as fields on the block itself rather than inputs.
const FIELD_SLOTS: &[(&str, &[&str])] = &[
    ("event_whenkeypressed", &["KEY_OPTION"]),
    ("sensing_keyoptions", &["KEY_OPTION"]),
    ("event_whenbackdropswitchesto", &["BACKDROP"]),
    ("event_whengreaterthan", &["WHENGREATERTHANMENU"]),
    ("event_whenbroadcastreceived", &["BROADCAST_OPTION"]),
    ("control_stop", &["STOP_OPTION"]),
    ("looks_backdropnumbername", &["NUMBER_NAME"]),
    ("looks_costumenumbername", &["NUMBER_NAME"]),
    ("looks_costume", &["COSTUME"]),
    ("looks_backdrops", &["BACKDROP"]),
    ("looks_seteffectto", &["EFFECT"]),
    ("looks_changeeffectby", &["EFFECT"]),
    ("looks_gotofrontback", &["FRONT_BACK"]),
    ("looks_goforwardbackwardlayers", &["FORWARD_BACKWARD"]),
    ("motion_setrotationstyle", &["STYLE"]),
    ("motion_goto_menu", &["TO"]),
    ("motion_glideto_menu", &["TO"]),
    ("motion_pointtowards_menu", &["TOWARDS"]),
    ("sound_changeeffectby", &["EFFECT"]),
    ("sound_seteffectto", &["EFFECT"]),
    ("sound_sounds_menu", &["SOUND_MENU"]),
    ("sensing_setdragmode", &["DRAG_MODE"]),
    ("sensing_distancetomenu", &["DISTANCETOMENU"]),
    ("sensing_of_object_menu", &["OBJECT"]),
    ("sensing_of", &["PROPERTY"]),
    ("sensing_current", &["CURRENTMENU"]),
    ("sensing_touchingobjectmenu", &["TOUCHINGOBJECTMENU"]),
    ("control_create_clone_of_menu", &["CLONE_OPTION"]),
    ("pen_menu_colorParam", &["colorParam"]),
    ("data_setvariableto", &["VARIABLE"]),
    ("data_changevariableby", &["VARIABLE"]),
    ("data_showvariable", &["VARIABLE"]),
    ("data_hidevariable", &["VARIABLE"]),
    ("data_addtolist", &["LIST"]),
    ("data_deleteoflist", &["LIST"]),
    ("data_deletealloflist", &["LIST"]),
    ("data_insertatlist", &["LIST"]),
    ("data_replaceitemoflist", &["LIST"]),
    ("data_itemoflist", &["LIST"]),
    ("data_itemnumoflist", &["LIST"]),
    ("data_lengthoflist", &["LIST"]),
    ("data_listcontainsitem", &["LIST"]),
    ("data_showlist", &["LIST"]),
    ("data_hidelist", &["LIST"]),
    ("data_variable", &["VARIABLE"]),
    ("data_listcontents", &["LIST"]),
    ("operator_mathop", &["OPERATOR"]),
    ("argument_reporter_string_number", &["VALUE"]),
    ("argument_reporter_boolean", &["VALUE"]),
];

/// Opcodes that exist only as menu shadow blocks inside another block's
/// input.
const MENU_SHADOW_OPCODES: &[&str] = &[
    "looks_costume",
    "looks_backdrops",
    "sound_sounds_menu",
    "pen_menu_colorParam",
    "sensing_keyoptions",
    "sensing_distancetomenu",
    "sensing_of_object_menu",
    "motion_goto_menu",
    "motion_glideto_menu",
    "motion_pointtowards_menu",
    "control_create_clone_of_menu",
    "sensing_touchingobjectmenu",
];

/// (host opcode, input name) -> (menu shadow opcode, menu field name).
const MENU_SHADOW_FOR_INPUT: &[((&str, &str), (&str, &str))] = &[
    (("motion_goto", "TO"), ("motion_goto_menu", "TO")),
    (("motion_glideto", "TO"), ("motion_glideto_menu", "TO")),
    (
        ("motion_pointtowards", "TOWARDS"),
        ("motion_pointtowards_menu", "TOWARDS"),
    ),
    (
        ("control_create_clone_of", "CLONE_OPTION"),
        ("control_create_clone_of_menu", "CLONE_OPTION"),
    ),
    (
        ("sensing_touchingobject", "TOUCHINGOBJECTMENU"),
        ("sensing_touchingobjectmenu", "TOUCHINGOBJECTMENU"),
    ),
    (
        ("sensing_distanceto", "DISTANCETOMENU"),
        ("sensing_distancetomenu", "DISTANCETOMENU"),
    ),
    (
        ("sensing_keypressed", "KEY_OPTION"),
        ("sensing_keyoptions", "KEY_OPTION"),
    ),
    (("sensing_of", "OBJECT"), ("sensing_of_object_menu", "OBJECT")),
    (
        ("looks_switchcostumeto", "COSTUME"),
        ("looks_costume", "COSTUME"),
    ),
    (
        ("looks_switchbackdropto", "BACKDROP"),
        ("looks_backdrops", "BACKDROP"),
    ),
    (
        ("sound_playuntildone", "SOUND_MENU"),
        ("sound_sounds_menu", "SOUND_MENU"),
    ),
    (("sound_play", "SOUND_MENU"), ("sound_sounds_menu", "SOUND_MENU")),
    (
        ("pen_setpenparamto", "COLOR_PARAM"),
        ("pen_menu_colorParam", "colorParam"),
    ),
    (
        ("pen_setPenColorParamTo", "COLOR_PARAM"),
        ("pen_menu_colorParam", "colorParam"),
    ),
    (
        ("pen_changepenparamby", "COLOR_PARAM"),
        ("pen_menu_colorParam", "colorParam"),
    ),
    (
        ("pen_changePenColorParamBy", "COLOR_PARAM"),
        ("pen_menu_colorParam", "colorParam"),
    ),
];

/// Legacy/lowercase opcode spellings normalized when emitting graph nodes.
const OPCODE_NORMALIZATION: &[(&str, &str)] = &[
    ("pen_setpensizeto", "pen_setPenSizeTo"),
    ("pen_setpencolortocolor", "pen_setPenColorToColor"),
    ("pen_penup", "pen_penUp"),
    ("pen_pendown", "pen_penDown"),
    ("pen_setpenparamto", "pen_setPenColorParamTo"),
    ("pen_changePenSizeBy", "pen_changepensizeby"),
];

const C_BLOCKS: &[&str] = &[
    "control_forever",
    "control_repeat",
    "control_repeat_until",
    "control_while",
    "control_if",
];

/// Slot-name fragments that mark a numeric input; everything else defaults
/// to a text shadow.
const NUMERIC_NAME_TOKENS: &[&str] = &[
    "NUM", "OPERAND", "VALUE", "X", "Y", "DX", "DY", "INDEX", "LETTER", "FROM", "TO", "TIMES",
    "DURATION", "SECS", "ANGLE", "DEGREES", "STEP", "SIZE", "CHANGE",
];

pub const ARG_REPORTER_STRING: &str = "argument_reporter_string_number";
pub const ARG_REPORTER_BOOLEAN: &str = "argument_reporter_boolean";
pub const PROCEDURES_DEFINITION: &str = "procedures_definition";
pub const PROCEDURES_PROTOTYPE: &str = "procedures_prototype";
pub const PROCEDURES_CALL: &str = "procedures_call";

pub struct Catalog {
    entries: Vec<CatalogEntry>,
    /// Indices of matchable entries keyed by leading literal word, in
    /// specificity order. Entries whose pattern opens with a slot live in
    /// `slot_lead`.
    by_first_word: HashMap<String, Vec<usize>>,
    slot_lead: Vec<usize>,
    by_opcode: HashMap<&'static str, usize>,
    field_slots: HashMap<&'static str, HashSet<&'static str>>,
    menu_for_input: HashMap<(&'static str, &'static str), (&'static str, &'static str)>,
    menu_opcodes: HashSet<&'static str>,
    normalization: HashMap<&'static str, &'static str>,
}

impl Catalog {
    /// The process-wide catalog, compiled from the format table on first
    /// use and immutable afterwards.
    pub fn global() -> &'static Catalog {
        static CATALOG: OnceLock<Catalog> = OnceLock::new();
        CATALOG.get_or_init(Catalog::new)
    }

    pub fn new() -> Self {
        let menu_opcodes: HashSet<&'static str> = MENU_SHADOW_OPCODES.iter().copied().collect();
        let mut entries = Vec::new();
        for (opcode, format) in BLOCK_FORMATS {
            entries.push(compile_format(opcode, format, menu_opcodes.contains(opcode)));
        }

        let mut order: Vec<usize> = (0..entries.len()).collect();
        // More literal text wins over fewer slots; declaration order breaks
        // the remaining ties (keeps control_if ahead of control_if_else).
        order.sort_by_key(|&idx| {
            let entry = &entries[idx];
            (usize::MAX - entry.literal_len, entry.slot_count, idx)
        });

        let mut by_first_word: HashMap<String, Vec<usize>> = HashMap::new();
        let mut slot_lead = Vec::new();
        for &idx in &order {
            let entry = &entries[idx];
            if entry.is_menu {
                continue;
            }
            match entry.segments.first() {
                Some(Segment::Word(word)) => {
                    by_first_word.entry(word.clone()).or_default().push(idx);
                }
                _ => slot_lead.push(idx),
            }
        }

        let by_opcode = entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (entry.opcode, idx))
            .collect();

        Self {
            entries,
            by_first_word,
            slot_lead,
            by_opcode,
            field_slots: FIELD_SLOTS
                .iter()
                .map(|(opcode, slots)| (*opcode, slots.iter().copied().collect()))
                .collect(),
            menu_for_input: MENU_SHADOW_FOR_INPUT.iter().copied().collect(),
            menu_opcodes,
            normalization: OPCODE_NORMALIZATION.iter().copied().collect(),
        }
    }

    pub fn entry(&self, opcode: &str) -> Option<&CatalogEntry> {
        self.by_opcode.get(opcode).map(|&idx| &self.entries[idx])
    }

    /// Finds the most specific entry of the wanted flavor whose pattern
    /// matches the piece sequence.
    pub fn lookup(&self, flavor: Flavor, pieces: &[PieceShape]) -> Option<&CatalogEntry> {
        let candidates: Box<dyn Iterator<Item = usize> + '_> = match pieces.first() {
            Some(PieceShape::Word(word)) => {
                let leads = self
                    .by_first_word
                    .get(*word)
                    .map(|indices| indices.iter().copied())
                    .into_iter()
                    .flatten();
                Box::new(leads.chain(self.slot_lead.iter().copied()))
            }
            _ => Box::new(self.slot_lead.iter().copied()),
        };
        for idx in candidates {
            let entry = &self.entries[idx];
            if entry.flavor == flavor && pattern_matches(entry, pieces) {
                return Some(entry);
            }
        }
        None
    }

    pub fn is_field_slot(&self, opcode: &str, slot: &str) -> bool {
        self.field_slots
            .get(opcode)
            .map(|slots| slots.contains(slot))
            .unwrap_or(false)
    }

    pub fn menu_shadow_for(&self, opcode: &str, input: &str) -> Option<(&'static str, &'static str)> {
        self.menu_for_input.get(&(opcode, input)).copied()
    }

    pub fn is_menu_opcode(&self, opcode: &str) -> bool {
        self.menu_opcodes.contains(opcode)
    }

    pub fn normalize_opcode<'a>(&'a self, opcode: &'a str) -> &'a str {
        self.normalization.get(opcode).copied().unwrap_or(opcode)
    }

    pub fn is_c_block(&self, opcode: &str) -> bool {
        C_BLOCKS.contains(&opcode) || opcode == "control_if_else"
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

fn pattern_matches(entry: &CatalogEntry, pieces: &[PieceShape]) -> bool {
    if entry.segments.len() != pieces.len() {
        return false;
    }
    entry
        .segments
        .iter()
        .zip(pieces)
        .all(|(segment, piece)| match (segment, piece) {
            (Segment::Word(expected), PieceShape::Word(found)) => expected == found,
            (Segment::Slot { kind, .. }, PieceShape::Dropdown) => *kind != SlotKind::Boolean,
            (Segment::Slot { kind, .. }, PieceShape::Slot) => *kind != SlotKind::Dropdown,
            _ => false,
        })
}

fn compile_format(opcode: &'static str, format: &'static str, is_menu: bool) -> CatalogEntry {
    let (flavor, body) = if format.starts_with('(') && format.ends_with(')') {
        (Flavor::Reporter, &format[1..format.len() - 1])
    } else if format.starts_with('<') && format.ends_with('>') {
        (Flavor::Boolean, &format[1..format.len() - 1])
    } else {
        (Flavor::Stack, format)
    };

    let mut segments = Vec::new();
    let mut literal_len = 0usize;
    let mut slot_count = 0usize;
    let mut word = String::new();
    let chars: Vec<char> = body.chars().collect();
    let mut index = 0usize;

    let flush = |word: &mut String, segments: &mut Vec<Segment>, literal_len: &mut usize| {
        if !word.is_empty() {
            *literal_len += word.len() + 1;
            segments.push(Segment::Word(std::mem::take(word)));
        }
    };

    while index < chars.len() {
        let ch = chars[index];
        // "[{NAME} v]" and "({NAME} v)" are dropdown slots
        let dropdown_close = match ch {
            '[' => Some(']'),
            '(' => Some(')'),
            _ => None,
        };
        if let (Some(close), Some('{')) = (dropdown_close, chars.get(index + 1).copied()) {
            flush(&mut word, &mut segments, &mut literal_len);
            index += 2;
            let mut name = String::new();
            while index < chars.len() && chars[index] != '}' {
                name.push(chars[index]);
                index += 1;
            }
            // skip "} v]" (or "} v)")
            while index < chars.len() && chars[index] != close {
                index += 1;
            }
            index += 1;
            literal_len += 4;
            slot_count += 1;
            segments.push(Segment::Slot {
                name,
                kind: SlotKind::Dropdown,
            });
            continue;
        }
        if ch == '{' {
            flush(&mut word, &mut segments, &mut literal_len);
            index += 1;
            let mut name = String::new();
            while index < chars.len() && chars[index] != '}' {
                name.push(chars[index]);
                index += 1;
            }
            index += 1;
            slot_count += 1;
            let kind = slot_kind(opcode, &name);
            segments.push(Segment::Slot { name, kind });
            continue;
        }
        if ch == ' ' {
            flush(&mut word, &mut segments, &mut literal_len);
            index += 1;
            continue;
        }
        word.push(ch);
        index += 1;
    }
    flush(&mut word, &mut segments, &mut literal_len);

    let wrap = if opcode == "control_if_else" {
        WrapKind::SubstackElse
    } else if C_BLOCKS.contains(&opcode) {
        WrapKind::Substack
    } else {
        WrapKind::None
    };

    CatalogEntry {
        opcode,
        flavor,
        wrap,
        segments,
        is_menu,
        literal_len,
        slot_count,
    }
}

fn slot_kind(opcode: &str, name: &str) -> SlotKind {
    if name == "BROADCAST_INPUT" {
        return SlotKind::Broadcast;
    }
    if name == "CONDITION" {
        return SlotKind::Boolean;
    }
    if matches!(opcode, "operator_and" | "operator_or" | "operator_not") {
        return SlotKind::Boolean;
    }
    if name.contains("COLOR") && name != "COLOR_PARAM" {
        return SlotKind::Color;
    }
    if NUMERIC_NAME_TOKENS.iter().any(|token| name.contains(token)) {
        SlotKind::Number
    } else {
        SlotKind::Text
    }
}

/// Both looks and sound effect blocks share the same wording; the effect
/// name decides which family is meant.
pub fn disambiguate_effect(opcode: &str, effect: &str) -> Option<(&'static str, &'static str)> {
    let upper = effect.trim().to_uppercase();
    if upper != "PITCH" && upper != "PAN" {
        return None;
    }
    match opcode {
        // looks uses CHANGE, sound uses VALUE
        "looks_changeeffectby" => Some(("sound_changeeffectby", "VALUE")),
        "looks_seteffectto" => Some(("sound_seteffectto", "VALUE")),
        _ => None,
    }
}

/// Maps friendly dropdown spellings to the IR's internal menu constants.
pub fn normalize_menu_value(menu_opcode: &str, field: &str, value: &str) -> String {
    let normalized = value.trim();
    let lowered = normalized
        .to_lowercase()
        .replace(['-', '_'], " ")
        .trim()
        .to_string();
    let mapped = match (menu_opcode, field) {
        ("sensing_touchingobjectmenu", "TOUCHINGOBJECTMENU") => match lowered.as_str() {
            "mouse pointer" | "mouse" => Some("_mouse_"),
            "edge" => Some("_edge_"),
            _ => None,
        },
        ("sensing_distancetomenu", "DISTANCETOMENU") => match lowered.as_str() {
            "mouse pointer" | "mouse" => Some("_mouse_"),
            "myself" => Some("_myself_"),
            _ => None,
        },
        ("motion_goto_menu", "TO") | ("motion_glideto_menu", "TO") => match lowered.as_str() {
            "random position" | "random" => Some("_random_"),
            "mouse pointer" | "mouse" => Some("_mouse_"),
            _ => None,
        },
        ("motion_pointtowards_menu", "TOWARDS") => match lowered.as_str() {
            "mouse pointer" | "mouse" => Some("_mouse_"),
            "random direction" | "random" => Some("_random_"),
            _ => None,
        },
        ("sensing_of_object_menu", "OBJECT") => match lowered.as_str() {
            "stage" => Some("_stage_"),
            _ => None,
        },
        ("control_create_clone_of_menu", "CLONE_OPTION") => match lowered.as_str() {
            "myself" => Some("_myself_"),
            _ => None,
        },
        _ => None,
    };
    mapped.map(str::to_string).unwrap_or_else(|| normalized.to_string())
}

/// Inverse of [`normalize_menu_value`], used when rendering a graph back to
/// text so compiler-produced graphs round-trip to the spelling the user
/// wrote.
pub fn display_menu_value(menu_opcode: &str, field: &str, value: &str) -> String {
    let mapped = match (menu_opcode, field, value) {
        (_, _, "_mouse_") => Some("mouse-pointer"),
        ("sensing_touchingobjectmenu", _, "_edge_") => Some("edge"),
        ("motion_pointtowards_menu", _, "_random_") => Some("random direction"),
        (_, _, "_random_") => Some("random position"),
        (_, _, "_myself_") => Some("myself"),
        (_, _, "_stage_") => Some("Stage"),
        _ => None,
    };
    mapped.map(str::to_string).unwrap_or_else(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_pattern_lookup() {
        let catalog = Catalog::global();
        let pieces = [
            PieceShape::Word("move"),
            PieceShape::Slot,
            PieceShape::Word("steps"),
        ];
        let entry = catalog.lookup(Flavor::Stack, &pieces).unwrap();
        assert_eq!(entry.opcode, "motion_movesteps");
        assert_eq!(entry.slot_kind("STEPS"), Some(SlotKind::Number));
    }

    #[test]
    fn dropdown_slot_distinguishes_list_length_from_string_length() {
        let catalog = Catalog::global();
        let with_dropdown = [
            PieceShape::Word("length"),
            PieceShape::Word("of"),
            PieceShape::Dropdown,
        ];
        let with_text = [
            PieceShape::Word("length"),
            PieceShape::Word("of"),
            PieceShape::Slot,
        ];
        assert_eq!(
            catalog.lookup(Flavor::Reporter, &with_dropdown).unwrap().opcode,
            "data_lengthoflist"
        );
        assert_eq!(
            catalog.lookup(Flavor::Reporter, &with_text).unwrap().opcode,
            "operator_length"
        );
    }

    #[test]
    fn dropdown_pieces_fill_menu_and_broadcast_slots() {
        let catalog = Catalog::global();
        let goto = [
            PieceShape::Word("go"),
            PieceShape::Word("to"),
            PieceShape::Dropdown,
        ];
        assert_eq!(
            catalog.lookup(Flavor::Stack, &goto).unwrap().opcode,
            "motion_goto"
        );
        let broadcast = [PieceShape::Word("broadcast"), PieceShape::Dropdown];
        assert_eq!(
            catalog.lookup(Flavor::Stack, &broadcast).unwrap().opcode,
            "event_broadcast"
        );
        // Boolean operands still refuse dropdown values.
        let wait_until = [
            PieceShape::Word("wait"),
            PieceShape::Word("until"),
            PieceShape::Dropdown,
        ];
        assert!(catalog.lookup(Flavor::Stack, &wait_until).is_none());
    }

    #[test]
    fn flavor_restricts_candidates() {
        let catalog = Catalog::global();
        let pieces = [
            PieceShape::Word("mouse"),
            PieceShape::Word("down?"),
        ];
        assert!(catalog.lookup(Flavor::Stack, &pieces).is_none());
        assert_eq!(
            catalog.lookup(Flavor::Boolean, &pieces).unwrap().opcode,
            "sensing_mousedown"
        );
    }

    #[test]
    fn if_matches_before_if_else() {
        let catalog = Catalog::global();
        let pieces = [
            PieceShape::Word("if"),
            PieceShape::Slot,
            PieceShape::Word("then"),
        ];
        assert_eq!(
            catalog.lookup(Flavor::Stack, &pieces).unwrap().opcode,
            "control_if"
        );
    }

    #[test]
    fn boolean_operand_slots_for_logic_blocks_only() {
        let catalog = Catalog::global();
        let and = catalog.entry("operator_and").unwrap();
        assert_eq!(and.slot_kind("OPERAND1"), Some(SlotKind::Boolean));
        let equals = catalog.entry("operator_equals").unwrap();
        assert_eq!(equals.slot_kind("OPERAND1"), Some(SlotKind::Number));
    }

    #[test]
    fn menu_shadow_mapping() {
        let catalog = Catalog::global();
        assert_eq!(
            catalog.menu_shadow_for("motion_goto", "TO"),
            Some(("motion_goto_menu", "TO"))
        );
        assert!(catalog.is_menu_opcode("motion_goto_menu"));
        assert!(catalog.is_field_slot("motion_goto_menu", "TO"));
    }

    #[test]
    fn menu_value_normalization_round_trip() {
        assert_eq!(
            normalize_menu_value("motion_goto_menu", "TO", "random position"),
            "_random_"
        );
        assert_eq!(
            display_menu_value("motion_goto_menu", "TO", "_random_"),
            "random position"
        );
        assert_eq!(
            normalize_menu_value("sensing_touchingobjectmenu", "TOUCHINGOBJECTMENU", "mouse-pointer"),
            "_mouse_"
        );
        assert_eq!(
            normalize_menu_value("sensing_touchingobjectmenu", "TOUCHINGOBJECTMENU", "Sprite2"),
            "Sprite2"
        );
    }

    #[test]
    fn effect_family_disambiguation() {
        assert_eq!(
            disambiguate_effect("looks_changeeffectby", "pitch"),
            Some(("sound_changeeffectby", "VALUE"))
        );
        assert_eq!(disambiguate_effect("looks_changeeffectby", "color"), None);
        assert_eq!(disambiguate_effect("sound_seteffectto", "pitch"), None);
    }

    #[test]
    fn opcode_normalization() {
        let catalog = Catalog::global();
        assert_eq!(
            catalog.normalize_opcode("pen_setpenparamto"),
            "pen_setPenColorParamTo"
        );
        assert_eq!(catalog.normalize_opcode("motion_movesteps"), "motion_movesteps");
    }
}
