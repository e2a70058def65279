//! Pattern library for metric payloads
//!
//! Each pattern is a line-protocol-like template plus the ordered roles of its
//! capture groups. The table is compiled exactly once at startup into
//! [`PatternLibrary`] and is read-only afterwards.
//!
//! Templates use three placeholders, expanded before compilation:
//!
//! - `{name}`: the metric name, a word starting with a letter or `_`
//! - `{num}`: a signed decimal or integer
//! - `{str}`: a double-quoted string, captured without the quotes

use regex::Regex;

use crate::error::ExporterError;

const NAME_GROUP: &str = r"\b([A-Za-z_]\w*)";
const NUM_GROUP: &str = r"([-\d.]+)";
const STR_GROUP: &str = r#""([^"]*)""#;

/// Semantic role of one capture group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Base metric name
    Name,
    /// Dimension key: suffixes the metric name and is recorded as a field
    Index(&'static str),
    /// Numeric field recorded under the given key
    Field(&'static str),
    /// Quoted string field; stored, never sampled
    Text(&'static str),
}

impl Role {
    /// Field key this role is stored under, `None` for the name role
    pub fn key(&self) -> Option<&'static str> {
        match self {
            Role::Name => None,
            Role::Index(key) | Role::Field(key) | Role::Text(key) => Some(key),
        }
    }
}

/// Uncompiled pattern definition
#[derive(Debug, Clone, Copy)]
pub struct PatternDef {
    pub id: &'static str,
    pub template: &'static str,
    pub roles: &'static [Role],
}

use Role::{Field, Index, Name, Text};

/// Built-in pattern table, in evaluation order
pub const PATTERN_TABLE: &[PatternDef] = &[
    PatternDef { id: "integer", template: "{name} v={num}i", roles: &[Name, Field("value")] },
    PatternDef { id: "float", template: "{name} v={num}", roles: &[Name, Field("value")] },
    PatternDef { id: "string", template: "{name} v={str}", roles: &[Name, Text("value")] },
    PatternDef {
        id: "xyv",
        template: "{name} x={num},y={num},v={num}",
        roles: &[Name, Field("x"), Field("y"), Field("value")],
    },
    PatternDef {
        id: "xyz",
        template: "{name} x={num},y={num},z={num}",
        roles: &[Name, Field("x"), Field("y"), Field("z")],
    },
    PatternDef { id: "xy", template: "{name} x={num},y={num}", roles: &[Name, Field("x"), Field("y")] },
    PatternDef {
        id: "a_f_x_y_z",
        template: "{name} a={num},f={num},x={num},y={num},z={num}",
        roles: &[Name, Field("a"), Field("f"), Field("x"), Field("y"), Field("z")],
    },
    PatternDef {
        id: "free_total",
        template: "{name} free={num}i,total={num}i",
        roles: &[Name, Field("free"), Field("total")],
    },
    PatternDef {
        id: "axis_sens_period_speed",
        template: "{name},axis={num} sens={num}i,period={num}i,speed={num}",
        roles: &[Name, Index("axis"), Field("sens"), Field("period"), Field("speed")],
    },
    PatternDef {
        id: "axis_last_total",
        template: "{name},axis={num} last={num}i,total={num}i",
        roles: &[Name, Index("axis"), Field("last"), Field("total")],
    },
    PatternDef {
        id: "ax_ok_v_n",
        template: "{name},ax={num},ok={num} v={num},n={num}",
        roles: &[Name, Field("ax"), Field("ok"), Field("value"), Index("n")],
    },
    PatternDef {
        id: "ax_reg_regn_value",
        template: "{name},ax={num} reg={num},regn={str},value={num}i",
        roles: &[Name, Index("ax"), Field("reg"), Text("regn"), Field("value")],
    },
    PatternDef {
        id: "ok_desc",
        template: "{name} ok={num},desc={str}",
        roles: &[Name, Field("ok"), Text("desc")],
    },
    PatternDef { id: "sent", template: "{name} sent={num}i", roles: &[Name, Field("sent")] },
    PatternDef { id: "recv", template: "{name} recv={num}i", roles: &[Name, Field("recv")] },
    PatternDef {
        id: "n_t_m",
        template: "{name},n={num} t={num},m={num}",
        roles: &[Name, Index("n"), Field("t"), Field("m")],
    },
    PatternDef { id: "n_u", template: "{name},n={num} u={num}", roles: &[Name, Index("n"), Field("u")] },
    PatternDef {
        id: "n_a_value_integer",
        template: "{name},n={num},a={num} value={num}i",
        roles: &[Name, Index("n"), Field("a"), Field("value")],
    },
    PatternDef {
        id: "n_a_value",
        template: "{name},n={num},a={num} value={num}",
        roles: &[Name, Index("n"), Field("a"), Field("value")],
    },
    PatternDef {
        id: "n_st_f_r_ri_sp",
        template: "{name},n={num} st={num},f={num},r={num},ri={num},sp={num}",
        roles: &[Name, Index("n"), Field("st"), Field("f"), Field("r"), Field("ri"), Field("sp")],
    },
    PatternDef {
        id: "n_v_e_integer",
        template: "{name},n={num} v={num}i,e={num}i",
        roles: &[Name, Index("n"), Field("value"), Field("e")],
    },
    PatternDef {
        id: "n_v_e",
        template: "{name},n={num} v={num},e={num}",
        roles: &[Name, Index("n"), Field("value"), Field("e")],
    },
    PatternDef {
        id: "n_v_integer",
        template: "{name},n={num} v={num}i",
        roles: &[Name, Index("n"), Field("value")],
    },
    PatternDef { id: "n_v", template: "{name},n={num} v={num}", roles: &[Name, Index("n"), Field("value")] },
    PatternDef {
        id: "n_p_i_d_tc",
        template: "{name},n={num} p={num},i={num},d={num},tc={num}",
        roles: &[Name, Index("n"), Field("p"), Field("i"), Field("d"), Field("tc")],
    },
    PatternDef {
        id: "as_fe_rs_ae",
        template: "{name} as={num},fe={num},rs={num},ae={num}",
        roles: &[Name, Field("as"), Field("fe"), Field("rs"), Field("ae")],
    },
    PatternDef {
        id: "fan_state_pwm_measured",
        template: "{name},fan={num} state={num},pwm={num},measured={num}",
        roles: &[Name, Index("fan"), Field("state"), Field("pwm"), Field("measured")],
    },
    PatternDef {
        id: "t_p_a_x_y",
        template: "{name},t={num},p={num},a={num} x={num},y={num}",
        roles: &[Name, Field("t"), Field("p"), Field("a"), Field("x"), Field("y")],
    },
    PatternDef {
        id: "t_p_x_y_z",
        template: "{name},t={num},p={num} x={num},y={num},z={num}",
        roles: &[Name, Field("t"), Field("p"), Field("x"), Field("y"), Field("z")],
    },
    PatternDef {
        id: "t_x_y_z",
        template: "{name},t={num} x={num},y={num},z={num}",
        roles: &[Name, Field("t"), Field("x"), Field("y"), Field("z")],
    },
    PatternDef {
        id: "r_o_s",
        template: "{name} r={num}i,o={num}i,s={num}",
        roles: &[Name, Field("r"), Field("o"), Field("s")],
    },
];

/// A compiled pattern
#[derive(Debug)]
pub struct Pattern {
    id: &'static str,
    regex: Regex,
    roles: &'static [Role],
}

impl Pattern {
    fn compile(def: &PatternDef) -> Result<Self, ExporterError> {
        let invalid = |reason: String| ExporterError::Pattern { pattern: def.id, reason };

        let names = def.roles.iter().filter(|r| matches!(r, Role::Name)).count();
        if names != 1 {
            return Err(invalid(format!("expected exactly one name role, found {}", names)));
        }
        let indexes = def.roles.iter().filter(|r| matches!(r, Role::Index(_))).count();
        if indexes > 1 {
            return Err(invalid(format!("at most one index role allowed, found {}", indexes)));
        }

        let source = expand_template(def.template);
        let regex = Regex::new(&source).map_err(|e| invalid(e.to_string()))?;

        // Group 0 is the whole match
        let groups = regex.captures_len() - 1;
        if groups != def.roles.len() {
            return Err(invalid(format!(
                "{} capture groups but {} roles",
                groups,
                def.roles.len()
            )));
        }

        // Text roles must sit exactly on `{str}` placeholders
        let slots = placeholders(def.template);
        if slots.len() == def.roles.len() {
            for (slot, role) in slots.iter().zip(def.roles) {
                if (*slot == "{str}") != matches!(role, Role::Text(_)) {
                    return Err(invalid(format!("role {:?} does not fit placeholder {}", role, slot)));
                }
            }
        }

        Ok(Self {
            id: def.id,
            regex,
            roles: def.roles,
        })
    }

    pub fn id(&self) -> &'static str {
        self.id
    }

    pub fn roles(&self) -> &'static [Role] {
        self.roles
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }
}

/// Placeholders of a template, in capture-group order
fn placeholders(template: &str) -> Vec<&'static str> {
    let mut slots = Vec::new();
    for (at, _) in template.match_indices('{') {
        let rest = &template[at..];
        for slot in ["{name}", "{num}", "{str}"] {
            if rest.starts_with(slot) {
                slots.push(slot);
            }
        }
    }
    slots
}

fn expand_template(template: &str) -> String {
    template
        .replace("{name}", NAME_GROUP)
        .replace("{num}", NUM_GROUP)
        .replace("{str}", STR_GROUP)
}

/// Immutable, ordered set of compiled patterns
#[derive(Debug)]
pub struct PatternLibrary {
    patterns: Vec<Pattern>,
}

impl PatternLibrary {
    /// Compile the built-in table. Any failure is a startup fault.
    pub fn compile() -> Result<Self, ExporterError> {
        Self::from_definitions(PATTERN_TABLE)
    }

    pub fn from_definitions(defs: &[PatternDef]) -> Result<Self, ExporterError> {
        let patterns = defs.iter().map(Pattern::compile).collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(patterns = patterns.len(), "Pattern library compiled");
        Ok(Self { patterns })
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
