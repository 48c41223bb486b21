//! Lisp command payload and output-file naming for an IDyOM run.

use std::path::Path;

use super::{IdyomInstructions, Smoothing, Viewpoint};

fn lisp_bool(b: bool) -> &'static str {
    if b { "t" } else { "nil" }
}

fn lisp_string(path: &Path) -> String {
    let s = path.to_string_lossy();
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Directory paths are passed with a trailing separator.
fn lisp_dir(path: &Path) -> String {
    let mut s = path.to_string_lossy().into_owned();
    if !s.ends_with('/') {
        s.push('/');
    }
    lisp_string(Path::new(&s))
}

fn lisp_list(viewpoints: &[Viewpoint]) -> String {
    format!(
        "'({})",
        viewpoints
            .iter()
            .map(Viewpoint::to_lisp)
            .collect::<Vec<_>>()
            .join(" ")
    )
}

fn lisp_ints<T: ToString>(values: &[T]) -> String {
    if values.is_empty() {
        return "nil".to_string();
    }
    format!(
        "'({})",
        values.iter().map(T::to_string).collect::<Vec<_>>().join(" ")
    )
}

fn smoothing_plist(s: &Smoothing) -> String {
    format!(
        "'(:order-bound {} :mixtures {} :update-exclusion {} :escape :{})",
        s.order_bound
            .map(|o| o.to_string())
            .unwrap_or_else(|| "nil".to_string()),
        lisp_bool(s.mixtures),
        lisp_bool(s.update_exclusion),
        s.escape.as_str()
    )
}

fn smoothing_token(s: &Smoothing) -> String {
    format!(
        "{}.{}.{}.{}",
        s.order_bound
            .map(|o| o.to_string())
            .unwrap_or_else(|| "nil".to_string()),
        lisp_bool(s.mixtures),
        lisp_bool(s.update_exclusion),
        s.escape.as_str()
    )
}

impl IdyomInstructions {
    /// The `(idyom:idyom ...)` call, without session setup.
    pub fn idyom_call(&self) -> String {
        let sources = match self.selection() {
            Some(_) => ":select".to_string(),
            None => lisp_list(self.sources()),
        };
        let mut args = vec![
            format!("(idyom:idyom {}", self.dataset_id()),
            lisp_list(self.targets()),
            sources,
            format!(":models :{}", self.model().as_str()),
            format!(":stmo {}", smoothing_plist(self.stm())),
            format!(":ltmo {}", smoothing_plist(self.ltm())),
            format!(":pretraining-ids {}", lisp_ints(&self.training().pretraining_ids)),
            format!(":k {}", self.training().k),
            format!(
                ":resampling-indices {}",
                lisp_ints(&self.training().resampling_indices)
            ),
        ];
        if let Some(sel) = self.selection() {
            let basis = if sel.basis.is_empty() {
                ":default".to_string()
            } else {
                lisp_list(&sel.basis)
            };
            args.push(format!(":basis {basis}"));
            if let Some(dp) = sel.dp {
                args.push(format!(":dp {dp}"));
            }
            args.push(format!(":max-links {}", sel.max_links));
            args.push(format!(":min-links {}", sel.min_links));
            if let Some(path) = &sel.output_path {
                args.push(format!(":viewpoint-selection-output {}", lisp_string(path)));
            }
        }
        let out = self.output();
        args.push(format!(":detail {}", out.detail));
        if let Some(dir) = &out.path {
            args.push(format!(":output-path {}", lisp_dir(dir)));
        }
        args.push(format!(":overwrite {}", lisp_bool(out.overwrite)));
        args.push(format!(":separator \"{}\"", out.separator.replace('"', "\\\"")));
        args.push(format!(
            ":use-resampling-set-cache? {}",
            lisp_bool(self.caching().use_resampling_set_cache)
        ));
        args.push(format!(
            ":use-ltms-cache? {})",
            lisp_bool(self.caching().use_ltms_cache)
        ));
        args.join(" ")
    }

    /// Full command payload: installation root and database connection
    /// when known, then the run itself.
    pub fn to_lisp(&self) -> String {
        let mut forms = Vec::new();
        if let Some(root) = self.idyom_root() {
            forms.push(format!("(defvar cl-user::*idyom-root* {})", lisp_dir(root)));
        }
        if let Some(db) = self.database_path() {
            forms.push(format!(
                "(clsql:connect '({}) :if-exists :old :database-type :sqlite3)",
                lisp_string(db)
            ));
        }
        forms.push(self.idyom_call());
        if forms.len() == 1 {
            return forms.remove(0);
        }
        format!("(progn {})", forms.join(" "))
    }

    /// Basename of the result table:
    /// `<dataset>-<targets>-<sources>-<model>-<stm>-<ltm>[-pre<ids>]-k<k>-d<detail>.dat`.
    /// Viewpoint lists are `_`-joined; smoothing renders as
    /// `<order>.<mixtures>.<update-exclusion>.<escape>`.
    pub fn output_filename(&self) -> String {
        let names = |vps: &[Viewpoint]| {
            vps.iter()
                .map(Viewpoint::name)
                .collect::<Vec<_>>()
                .join("_")
        };
        let sources = if self.selection().is_some() {
            "selection".to_string()
        } else {
            names(self.sources())
        };
        let mut parts = vec![
            self.dataset_id().to_string(),
            names(self.targets()),
            sources,
            self.model().as_str().to_string(),
            smoothing_token(self.stm()),
            smoothing_token(self.ltm()),
        ];
        let pre = &self.training().pretraining_ids;
        if !pre.is_empty() {
            parts.push(format!(
                "pre{}",
                pre.iter().map(u32::to_string).collect::<Vec<_>>().join(".")
            ));
        }
        parts.push(format!("k{}", self.training().k));
        parts.push(format!("d{}", self.output().detail));
        format!("{}.dat", parts.join("-"))
    }

    /// Query asking the runtime for the filename it will write, for runtimes
    /// that name output themselves.
    pub fn filename_query(&self) -> String {
        let sources = match self.selection() {
            Some(_) => ":select".to_string(),
            None => lisp_list(self.sources()),
        };
        format!(
            "(idyom::dataset-modelling-filename {} {} {} :models :{} :k {} :detail {} :pretraining-ids {} :extension \".dat\")",
            self.dataset_id(),
            lisp_list(self.targets()),
            sources,
            self.model().as_str(),
            self.training().k,
            self.output().detail,
            lisp_ints(&self.training().pretraining_ids),
        )
    }
}

#[cfg(test)]
mod tests {
    use crate::idyom::{IdyomBuilder, ModelKind, Selection, Viewpoint};

    fn instructions() -> crate::idyom::IdyomInstructions {
        IdyomBuilder::new()
            .dataset(7)
            .target(Viewpoint::basic("cpitch"))
            .source(Viewpoint::basic("cpitch"))
            .source(Viewpoint::linked([
                Viewpoint::derived("cpint"),
                Viewpoint::derived("ioi"),
            ]))
            .model(ModelKind::Both)
            .pretraining(vec![2, 3])
            .output_dir("/tmp/out")
            .to_instructions_file()
            .unwrap()
    }

    #[test]
    fn test_call_shape() {
        let call = instructions().idyom_call();
        assert!(call.starts_with("(idyom:idyom 7 '(cpitch) '(cpitch (cpint ioi)) :models :both"));
        assert!(call.contains(":pretraining-ids '(2 3)"));
        assert!(call.contains(":stmo '(:order-bound nil :mixtures t :update-exclusion t :escape :x)"));
        assert!(call.contains(":output-path \"/tmp/out/\""));
        assert!(call.ends_with(":use-ltms-cache? t)"));
        assert_eq!(call.matches('(').count(), call.matches(')').count());
    }

    #[test]
    fn test_payload_wraps_setup() {
        let inst = instructions().with_runtime_paths(
            Some("/opt/idyom".into()),
            Some("/opt/idyom/db.sqlite".into()),
            None,
        );
        let lisp = inst.to_lisp();
        assert!(lisp.starts_with("(progn (defvar cl-user::*idyom-root* \"/opt/idyom/\")"));
        assert!(lisp.contains("(clsql:connect '(\"/opt/idyom/db.sqlite\")"));
        assert_eq!(lisp.matches('(').count(), lisp.matches(')').count());
    }

    #[test]
    fn test_filename_is_deterministic() {
        let a = instructions();
        assert_eq!(
            a.output_filename(),
            "7-cpitch-cpitch_cpint.ioi-both-nil.t.t.x-nil.t.nil.c-pre2.3-k10-d3.dat"
        );
        assert_eq!(a.output_filename(), instructions().output_filename());
        assert!(a.results_file_path().unwrap().ends_with(a.output_filename()));
    }

    #[test]
    fn test_selection_call() {
        let inst = IdyomBuilder::new()
            .dataset(1)
            .target(Viewpoint::basic("cpitch"))
            .select(Selection {
                dp: Some(2),
                ..Selection::default()
            })
            .to_instructions_file()
            .unwrap();
        let call = inst.idyom_call();
        assert!(call.contains("'(cpitch) :select"));
        assert!(call.contains(":basis :default :dp 2 :max-links 2 :min-links 2"));
        assert!(inst.output_filename().starts_with("1-cpitch-selection-"));
        assert!(inst.filename_query().contains(":select"));
    }
}
