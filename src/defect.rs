//! Defect-prediction scores.
//!
//! One CSV per class under test (`<DP_DIR>/<class>.csv`, header row,
//! `fqMethodName,defectScore`) maps fully-qualified method names to defect
//! scores. The extractor names methods in descriptor form
//! (`min(SSS)S`); the defect files use the spelled-out convention
//! (`pkg.Class.min(short;short;short;)short:`), so both spellings are
//! normalized onto the latter before lookup. A method with a positive
//! score is buggy; a method missing from the file is logged and treated as
//! non-buggy.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use log::warn;

use crate::config::ConfigError;

/// One scored method of the class under test.
#[derive(Debug, Clone)]
pub struct DefectMethod {
    pub fq_name: String,
    pub defect_score: f64,
    pub norm_score: f64,
    pub weight: f64,
    pub archive_probability: f64,
    pub evo_name: Option<String>,
    pub branch_ids: Vec<i32>,
}

impl DefectMethod {
    fn new(fq_name: String, defect_score: f64) -> Self {
        DefectMethod {
            fq_name,
            defect_score,
            norm_score: 0.0,
            weight: 0.0,
            archive_probability: 0.0,
            evo_name: None,
            branch_ids: Vec::new(),
        }
    }

    pub fn is_buggy(&self) -> bool {
        self.defect_score > 0.0
    }
}

/// Defect scores of one class, with the evo-format name equivalences
/// registered as goals are linked in.
#[derive(Debug, Clone)]
pub struct MethodPool {
    class_name: String,
    methods: IndexMap<String, DefectMethod>,
    /// `"class.method(Desc)Ret"` → fully-qualified converted name.
    equivalent_names: IndexMap<String, String>,
    default_weight: f64,
}

impl MethodPool {
    /// Loads `<dp_dir>/<class_name>.csv`. Missing file or malformed rows
    /// are fatal at startup.
    pub fn load(dp_dir: &Path, class_name: &str) -> Result<Self, ConfigError> {
        let path = dp_dir.join(format!("{class_name}.csv"));
        let content = fs::read_to_string(&path).map_err(|_| ConfigError::MissingDefectScores {
            path: path.clone(),
        })?;

        let mut methods = IndexMap::new();
        for (index, row) in content.lines().enumerate().skip(1) {
            let row = row.trim();
            if row.is_empty() {
                continue;
            }
            let (raw_name, raw_score) =
                row.rsplit_once(',')
                    .ok_or_else(|| ConfigError::MalformedDefectScores {
                        path: path.clone(),
                        line: index + 1,
                    })?;
            let score: f64 =
                raw_score
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::MalformedDefectScores {
                        path: path.clone(),
                        line: index + 1,
                    })?;
            let fq_name = format_fq_method_name(raw_name.trim()).ok_or_else(|| {
                ConfigError::MalformedDefectScores {
                    path: path.clone(),
                    line: index + 1,
                }
            })?;
            methods.insert(fq_name.clone(), DefectMethod::new(fq_name, score));
        }

        Ok(MethodPool {
            class_name: class_name.to_string(),
            methods,
            equivalent_names: IndexMap::new(),
            default_weight: 0.0,
        })
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn methods(&self) -> impl Iterator<Item = &DefectMethod> {
        self.methods.values()
    }

    /// Registers the descriptor-format spelling of a method together with
    /// its branches, so goal lookups can resolve it later.
    pub fn link_method(&mut self, evo_method: &str, branch_ids: Vec<i32>) {
        let evo_key = format!("{}.{}", self.class_name, evo_method);
        let fq_name = convert_method_name(evo_method, &self.class_name);
        match self.methods.get_mut(&fq_name) {
            Some(method) => {
                method.evo_name = Some(evo_method.to_string());
                method.branch_ids = branch_ids;
                self.equivalent_names.insert(evo_key, fq_name);
            }
            None => {
                warn!("method missing from defect scores, treated as non-buggy: {fq_name}");
            }
        }
    }

    fn by_evo_key(&self, evo_key: &str) -> Option<&DefectMethod> {
        if let Some(fq_name) = self.equivalent_names.get(evo_key) {
            return self.methods.get(fq_name);
        }
        // Inner classes arrive dotted from method-coverage goals while the
        // equivalences were registered with `$` spelling.
        for (known, fq_name) in &self.equivalent_names {
            if evo_key == known.replace('$', ".") {
                return self.methods.get(fq_name);
            }
        }
        None
    }

    fn lookup(&self, method_evo: &str) -> Option<&DefectMethod> {
        let evo_key = format!("{}.{}", self.class_name, method_evo);
        if let Some(method) = self.by_evo_key(&evo_key) {
            return Some(method);
        }
        // Unlinked methods still resolve through direct conversion.
        self.methods
            .get(&convert_method_name(method_evo, &self.class_name))
    }

    /// Whether the method's defect score marks it buggy. Unknown methods
    /// are logged and count as non-buggy.
    pub fn is_buggy(&self, method_evo: &str) -> bool {
        match self.lookup(method_evo) {
            Some(method) => method.is_buggy(),
            None => {
                warn!(
                    "no defect score for {}.{}; treated as non-buggy",
                    self.class_name, method_evo
                );
                false
            }
        }
    }

    pub fn defect_score(&self, method_evo: &str) -> Option<f64> {
        self.lookup(method_evo).map(|m| m.defect_score)
    }

    pub fn archive_probability(&self, method_evo: &str) -> f64 {
        self.lookup(method_evo)
            .map(|m| m.archive_probability)
            .unwrap_or(0.0)
    }

    /// Sum-normalizes the scores into per-method weights; the default
    /// weight is their mean.
    pub fn calculate_weights(&mut self) {
        let sum: f64 = self.methods.values().map(|m| m.defect_score).sum();
        if sum == 0.0 || self.methods.is_empty() {
            self.default_weight = 0.0;
            return;
        }
        let mut norm_sum = 0.0;
        for method in self.methods.values_mut() {
            method.norm_score = method.defect_score / sum;
            method.weight = method.norm_score;
            norm_sum += method.norm_score;
        }
        self.default_weight = norm_sum / self.methods.len() as f64;
    }

    /// Archive probability currently equals the raw defect score.
    pub fn calculate_archive_probabilities(&mut self) {
        for method in self.methods.values_mut() {
            method.archive_probability = method.defect_score;
        }
    }

    pub fn default_weight(&self) -> f64 {
        self.default_weight
    }
}

/// Per-class method pools, resolved with inner-class awareness: an inner
/// class uses its outermost class's pool.
#[derive(Debug, Clone, Default)]
pub struct DefectModel {
    pools: IndexMap<String, MethodPool>,
}

impl DefectModel {
    pub fn new() -> Self {
        DefectModel::default()
    }

    pub fn load_class(&mut self, dp_dir: &Path, class_name: &str) -> Result<(), ConfigError> {
        let mut pool = MethodPool::load(dp_dir, class_name)?;
        pool.calculate_weights();
        pool.calculate_archive_probabilities();
        self.pools.insert(class_name.to_string(), pool);
        Ok(())
    }

    pub fn pool_for(&self, class_name: &str) -> Option<&MethodPool> {
        if let Some(pool) = self.pools.get(class_name) {
            return Some(pool);
        }
        self.pools.iter().find_map(|(outer, pool)| {
            let dotted = format!("{outer}.");
            let nested = format!("{outer}$");
            if class_name.starts_with(&dotted) || class_name.starts_with(&nested) {
                Some(pool)
            } else {
                None
            }
        })
    }

    pub fn pool_for_mut(&mut self, class_name: &str) -> Option<&mut MethodPool> {
        let key = if self.pools.contains_key(class_name) {
            class_name.to_string()
        } else {
            self.pools
                .keys()
                .find(|outer| {
                    class_name.starts_with(&format!("{outer}."))
                        || class_name.starts_with(&format!("{outer}$"))
                })?
                .clone()
        };
        self.pools.get_mut(&key)
    }

    pub fn is_buggy(&self, class_name: &str, method_evo: &str) -> bool {
        match self.pool_for(class_name) {
            Some(pool) => pool.is_buggy(method_evo),
            None => {
                warn!("no defect scores loaded for class {class_name}; treated as non-buggy");
                false
            }
        }
    }
}

/// Normalizes a defect-file method name: `)void:` becomes `):`, varargs
/// become arrays, generic parameters are stripped.
fn format_fq_method_name(raw: &str) -> Option<String> {
    let name = raw.replace(")void:", "):").replace("...", "[]").replace("<?>", "");

    let open = name.find('(')?;
    let close = name.find(')')?;
    if close < open {
        return None;
    }
    let simple = &name[..open];
    let param_str = &name[open + 1..close];
    let return_type = {
        let rest = &name[close + 1..];
        let colon = rest.rfind(':')?;
        strip_generics(&rest[..colon])
    };

    let mut formatted = format!("{simple}(");
    for parameter in param_str.split(';').filter(|p| !p.is_empty()) {
        formatted.push_str(&strip_generics(parameter));
        formatted.push(';');
    }
    formatted.push(')');
    formatted.push_str(&return_type);
    formatted.push(':');
    Some(formatted)
}

fn strip_generics(parameter: &str) -> String {
    match parameter.find('<') {
        Some(index) => parameter[..index].to_string(),
        None => parameter.to_string(),
    }
}

/// Converts a descriptor-format method name (`min(SSS)S`) to the
/// defect-file convention (`pkg.Class.min(short;short;short;)short:`).
pub fn convert_method_name(evo_method: &str, class_name: &str) -> String {
    let (simple, descriptor) = match evo_method.split_once('(') {
        Some(parts) => parts,
        None => return format!("{class_name}.{evo_method}():"),
    };
    let (params, ret) = match descriptor.split_once(')') {
        Some(parts) => parts,
        None => (descriptor, "V"),
    };

    let mut converted = format!("{class_name}.{simple}(");
    let mut chars = params.chars().peekable();
    while chars.peek().is_some() {
        if let Some(ty) = convert_descriptor_type(&mut chars) {
            converted.push_str(&ty);
            converted.push(';');
        }
    }
    converted.push(')');

    let mut ret_chars = ret.chars().peekable();
    match convert_descriptor_type(&mut ret_chars) {
        Some(ty) if ty != "void" => converted.push_str(&ty),
        _ => {}
    }
    converted.push(':');
    converted
}

fn convert_descriptor_type(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
) -> Option<String> {
    match chars.next()? {
        'B' => Some("byte".to_string()),
        'C' => Some("char".to_string()),
        'D' => Some("double".to_string()),
        'F' => Some("float".to_string()),
        'I' => Some("int".to_string()),
        'J' => Some("long".to_string()),
        'S' => Some("short".to_string()),
        'Z' => Some("boolean".to_string()),
        'V' => Some("void".to_string()),
        'L' => {
            let mut class = String::new();
            for c in chars.by_ref() {
                if c == ';' {
                    break;
                }
                class.push(if c == '/' { '.' } else { c });
            }
            Some(class)
        }
        '[' => convert_descriptor_type(chars).map(|inner| format!("{inner}[]")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLASS: &str = "org.apache.commons.lang.math.NumberUtils";

    fn write_scores(rows: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut content = String::from("fqMethodName,defectScore\n");
        for row in rows {
            content.push_str(row);
            content.push('\n');
        }
        fs::write(dir.path().join(format!("{CLASS}.csv")), content).expect("write csv");
        dir
    }

    #[test]
    fn test_descriptor_conversion() {
        assert_eq!(
            convert_method_name("min(SSS)S", CLASS),
            format!("{CLASS}.min(short;short;short;)short:")
        );
        assert_eq!(
            convert_method_name("toArray([I)[I", CLASS),
            format!("{CLASS}.toArray(int[];)int[]:")
        );
        assert_eq!(
            convert_method_name("parse(Ljava/lang/String;)V", CLASS),
            format!("{CLASS}.parse(java.lang.String;):")
        );
    }

    #[test]
    fn test_fq_name_normalization() {
        assert_eq!(
            format_fq_method_name(&format!("{CLASS}.reset()void:")).unwrap(),
            format!("{CLASS}.reset():")
        );
        assert_eq!(
            format_fq_method_name(&format!("{CLASS}.max(int...)int:")).unwrap(),
            format!("{CLASS}.max(int[];)int:")
        );
        assert_eq!(
            format_fq_method_name(&format!("{CLASS}.put(List<String>;)void:")).unwrap(),
            format!("{CLASS}.put(List;):")
        );
    }

    #[test]
    fn test_load_and_buggy_lookup() {
        let dir = write_scores(&[
            &format!("{CLASS}.min(short;short;short;)short:,1.0"),
            &format!("{CLASS}.max(int;int;)int:,0.0"),
        ]);
        let pool = MethodPool::load(dir.path(), CLASS).unwrap();

        assert!(pool.is_buggy("min(SSS)S"));
        assert!(!pool.is_buggy("max(II)I"));
        // Unknown methods are non-buggy, not errors.
        assert!(!pool.is_buggy("unknown()V"));
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        match MethodPool::load(dir.path(), CLASS) {
            Err(ConfigError::MissingDefectScores { .. }) => {}
            other => panic!("expected MissingDefectScores, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_row_is_fatal() {
        let dir = write_scores(&["not a csv row"]);
        match MethodPool::load(dir.path(), CLASS) {
            Err(ConfigError::MalformedDefectScores { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected MalformedDefectScores, got {other:?}"),
        }
    }

    #[test]
    fn test_linked_method_resolves_through_equivalence() {
        let dir = write_scores(&[&format!("{CLASS}.min(short;short;short;)short:,0.8")]);
        let mut pool = MethodPool::load(dir.path(), CLASS).unwrap();
        pool.link_method("min(SSS)S", vec![4, 5]);

        assert!(pool.is_buggy("min(SSS)S"));
        let method = pool.lookup("min(SSS)S").unwrap();
        assert_eq!(method.branch_ids, vec![4, 5]);
        assert_eq!(method.evo_name.as_deref(), Some("min(SSS)S"));
    }

    #[test]
    fn test_weights_are_sum_normalized() {
        let dir = write_scores(&[
            &format!("{CLASS}.min(short;short;short;)short:,3.0"),
            &format!("{CLASS}.max(int;int;)int:,1.0"),
        ]);
        let mut pool = MethodPool::load(dir.path(), CLASS).unwrap();
        pool.calculate_weights();

        let weights: Vec<f64> = pool.methods().map(|m| m.weight).collect();
        assert_eq!(weights, vec![0.75, 0.25]);
        assert_eq!(pool.default_weight(), 0.5);
    }

    #[test]
    fn test_inner_class_resolves_to_outer_pool() {
        let dir = write_scores(&[&format!("{CLASS}.min(short;short;short;)short:,1.0")]);
        let mut model = DefectModel::new();
        model.load_class(dir.path(), CLASS).unwrap();

        assert!(model.pool_for(&format!("{CLASS}$Range")).is_some());
        assert!(model.pool_for(&format!("{CLASS}.Range")).is_some());
        assert!(model.pool_for("org.apache.commons.lang.Other").is_none());
        assert!(model.is_buggy(&format!("{CLASS}$Range"), "min(SSS)S"));
    }
}
