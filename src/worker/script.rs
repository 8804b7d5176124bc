//! Benchmark driver scripts.
//!
//! sysbench runs a Lua script that prepares the submitted statement once per
//! thread and executes it on every event, binding parameter values drawn at
//! random from the submitted value lists.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::{QueueError, Result};

/// Everything needed to render one driver script.
#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub sql_template: String,
    pub sql_params: Vec<String>,
    pub delimiter: String,
    pub params_sync: bool,
    pub output_path: PathBuf,
}

/// Turns a statement template and its parameters into an executable artifact.
#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    /// Write the artifact and return its path.
    async fn materialize(&self, request: ScriptRequest) -> Result<PathBuf>;
}

/// How a parameter column is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Int,
    Char,
}

/// One placeholder's candidate values, already rendered as Lua literals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamColumn {
    pub kind: ParamKind,
    pub literals: Vec<String>,
}

/// Split and type one parameter list. The column is bound as an integer only
/// if every value parses as one; otherwise values are strings with one pair
/// of matching surrounding quotes removed.
pub fn param_column(raw: &str, delimiter: &str) -> ParamColumn {
    let values: Vec<&str> = if delimiter.is_empty() {
        vec![raw]
    } else {
        raw.split(delimiter).collect()
    };

    let ints: Option<Vec<i64>> = values.iter().map(|v| v.parse::<i64>().ok()).collect();
    match ints {
        Some(ints) => ParamColumn {
            kind: ParamKind::Int,
            literals: ints.iter().map(i64::to_string).collect(),
        },
        None => ParamColumn {
            kind: ParamKind::Char,
            literals: values
                .iter()
                .map(|v| lua_string(strip_quotes(v)))
                .collect(),
        },
    }
}

fn strip_quotes(value: &str) -> &str {
    for quote in ['\'', '"'] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Quote `value` as a Lua string literal.
fn lua_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

const CHAR_BIND_LEN: usize = 120;

const LUA_TEMPLATE: &str = r#"-- generated benchmark driver
local t = sysbench.sql.type
local stmt_def = { __STMT_DEF__ }

function thread_init(thread_id)
    drv = sysbench.sql.driver()
    con = drv:connect()

    stmt = con:prepare(stmt_def[1])
    param = {}

    local nparam = #stmt_def - 1
    for p = 1, nparam do
        local btype = stmt_def[p + 1]
        local len
        if type(btype) == "table" then
            len = btype[2]
            btype = btype[1]
        end
        if btype == sysbench.sql.type.VARCHAR or btype == sysbench.sql.type.CHAR then
            param[p] = stmt:bind_create(btype, len)
        else
            param[p] = stmt:bind_create(btype)
        end
    end

    if nparam > 0 then
        stmt:bind_param(unpack(param))
    end
end

local function pick(values, i)
    if i == nil then
        return values[math.random(1, #values)]
    end
    return values[i]
end

__PARAM_TABLES__

function event(thread_id)
__PARAM_SET__    stmt:execute()
end
"#;

/// Render the driver script for `request` without touching the filesystem.
pub fn render_lua(request: &ScriptRequest) -> String {
    let columns: Vec<ParamColumn> = request
        .sql_params
        .iter()
        .map(|raw| param_column(raw, &request.delimiter))
        .collect();

    let mut stmt_def = lua_string(&request.sql_template);
    let mut tables = String::new();
    let mut set = String::new();

    if !columns.is_empty() {
        if request.params_sync {
            set.push_str("    local ii = math.random(1, #p1)\n");
        } else {
            set.push_str("    local ii = nil\n");
        }
    }

    for (i, column) in columns.iter().enumerate() {
        let n = i + 1;
        match column.kind {
            ParamKind::Int => stmt_def.push_str(", t.INT"),
            ParamKind::Char => stmt_def.push_str(&format!(", {{t.CHAR, {}}}", CHAR_BIND_LEN)),
        }
        tables.push_str(&format!(
            "local p{} = {{ {} }}\n",
            n,
            column.literals.join(", ")
        ));
        set.push_str(&format!("    param[{}]:set(pick(p{}, ii))\n", n, n));
    }

    LUA_TEMPLATE
        .replace("__STMT_DEF__", &stmt_def)
        .replace("__PARAM_TABLES__", tables.trim_end())
        .replace("__PARAM_SET__", &set)
}

/// Writes sysbench Lua drivers to the requested path.
#[derive(Debug, Clone, Default)]
pub struct LuaScriptGenerator;

#[async_trait]
impl ScriptGenerator for LuaScriptGenerator {
    async fn materialize(&self, request: ScriptRequest) -> Result<PathBuf> {
        if request.sql_template.trim().is_empty() {
            return Err(QueueError::ScriptGeneration(
                "statement template is empty".to_string(),
            ));
        }

        let script = render_lua(&request);
        if let Some(dir) = request.output_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&request.output_path, script).await?;

        tracing::debug!(path = %request.output_path.display(), "Wrote benchmark script");
        Ok(request.output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(params: &[&str], sync: bool) -> ScriptRequest {
        ScriptRequest {
            sql_template: "select * from t where id = ? and name = ?".to_string(),
            sql_params: params.iter().map(|p| p.to_string()).collect(),
            delimiter: ",".to_string(),
            params_sync: sync,
            output_path: PathBuf::from("/tmp/unused.lua"),
        }
    }

    #[test]
    fn integer_column() {
        let column = param_column("111,22,333", ",");
        assert_eq!(column.kind, ParamKind::Int);
        assert_eq!(column.literals, vec!["111", "22", "333"]);
    }

    #[test]
    fn mixed_column_becomes_strings_and_strips_quotes() {
        let column = param_column("'aaa',\"bbb\",ccc,42", ",");
        assert_eq!(column.kind, ParamKind::Char);
        assert_eq!(column.literals, vec!["\"aaa\"", "\"bbb\"", "\"ccc\"", "\"42\""]);
    }

    #[test]
    fn lua_strings_are_escaped() {
        assert_eq!(lua_string(r#"a"b\c"#), r#""a\"b\\c""#);
    }

    #[test]
    fn render_binds_each_column() {
        let lua = render_lua(&request(&["1,2,3", "x,y"], false));
        assert!(lua.contains(r#"local stmt_def = { "select * from t where id = ? and name = ?", t.INT, {t.CHAR, 120} }"#));
        assert!(lua.contains("local p1 = { 1, 2, 3 }"));
        assert!(lua.contains(r#"local p2 = { "x", "y" }"#));
        assert!(lua.contains("local ii = nil"));
        assert!(lua.contains("param[2]:set(pick(p2, ii))"));
    }

    #[test]
    fn synchronized_params_share_one_index() {
        let lua = render_lua(&request(&["1,2", "3,4"], true));
        assert!(lua.contains("local ii = math.random(1, #p1)"));
    }

    #[test]
    fn no_params_no_bindings() {
        let lua = render_lua(&request(&[], false));
        assert!(!lua.contains("local ii"));
        assert!(!lua.contains("param[1]"));
    }

    #[tokio::test]
    async fn materialize_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut req = request(&["1,2"], false);
        req.output_path = dir.path().join("nested").join("db_1.lua");

        let path = LuaScriptGenerator.materialize(req).await.unwrap();
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("function event(thread_id)"));
    }

    #[tokio::test]
    async fn empty_template_is_rejected() {
        let mut req = request(&[], false);
        req.sql_template = "  ".to_string();
        let err = LuaScriptGenerator.materialize(req).await.unwrap_err();
        assert!(matches!(err, QueueError::ScriptGeneration(_)));
    }
}
