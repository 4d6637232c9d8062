use std::ffi::{c_char, CStr, CString};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use once_cell::sync::Lazy;

use crate::config::locate_and_load;
use crate::embedding::LazyEmbedder;
use crate::error::CleanError;
use crate::models::{open_embedder, DEFAULT_EMBEDDING_BACKEND};
use crate::progress::ConsoleProgress;
use crate::textio::{decode_document, encode_document};
use crate::tmx::{CleanOptions, TmxCleaner};
use crate::xliff::split_by_error_code;

static LAST_ERROR: Lazy<Mutex<Option<CString>>> = Lazy::new(|| Mutex::new(None));

fn set_last_error(msg: &str) {
    let c = CString::new(msg.replace('\0', " ")).unwrap_or_default();
    let mut guard = LAST_ERROR.lock().unwrap_or_else(|e| e.into_inner());
    *guard = Some(c);
}

fn take_cstr(ptr: *const c_char, name: &str) -> Result<String, String> {
    if ptr.is_null() {
        return Err(format!("{name} is null"));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map(|s| s.to_string())
        .map_err(|_| format!("{name} is not valid UTF-8"))
}

fn take_paths(args: &[(*const c_char, &str)]) -> Result<Vec<PathBuf>, (String, i32)> {
    args.iter()
        .enumerate()
        .map(|(i, (ptr, name))| {
            take_cstr(*ptr, name)
                .map(PathBuf::from)
                .map_err(|e| (e, 2 + i as i32))
        })
        .collect()
}

/// Exit code for a failed clean: 10 parse, 11 threshold, 12 embedding, 13 output, 19 other.
fn clean_error_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<CleanError>() {
        Some(CleanError::DocumentParse(_)) => 10,
        Some(CleanError::InvalidThreshold(_)) => 11,
        Some(CleanError::EmbeddingUnavailable(_)) | Some(CleanError::EmbeddingContract(_)) => 12,
        Some(CleanError::Output(_)) => 13,
        None => 19,
    }
}

fn run_clean(config_path: &Path, input: &Path, output: &Path) -> anyhow::Result<()> {
    let workdir = input.parent().unwrap_or_else(|| Path::new("."));
    let (cfg, cfg_path) = locate_and_load(Some(config_path.to_path_buf()), workdir)?;
    let opts = CleanOptions::from_config(&cfg)?;
    let backend = cfg
        .embedding
        .backend
        .clone()
        .unwrap_or_else(|| DEFAULT_EMBEDDING_BACKEND.to_string());
    let embedder = LazyEmbedder::new(|| open_embedder(&cfg, &cfg_path, &backend, None));
    let cleaner = TmxCleaner::new(opts, ConsoleProgress::disabled());
    cleaner.clean_file(input, output, &embedder)?;
    Ok(())
}

/// Clean a TMX file using `bitext-toolkit.toml` and the configured embedding backend.
///
/// Returns 0 on success; non-zero on failure (see `bt_last_error_utf8()`).
#[no_mangle]
pub extern "C" fn bt_clean_tmx(
    config_path: *const c_char,
    input_tmx: *const c_char,
    output_tmx: *const c_char,
) -> i32 {
    let paths = match take_paths(&[
        (config_path, "config_path"),
        (input_tmx, "input_tmx"),
        (output_tmx, "output_tmx"),
    ]) {
        Ok(v) => v,
        Err((e, code)) => {
            set_last_error(&e);
            return code;
        }
    };

    match run_clean(&paths[0], &paths[1], &paths[2]) {
        Ok(()) => 0,
        Err(err) => {
            set_last_error(&format!("{err:#}"));
            clean_error_code(&err)
        }
    }
}

fn run_split(input: &Path, output_zip: &Path) -> anyhow::Result<bool> {
    let bytes = std::fs::read(input).with_context(|| format!("read input: {}", input.display()))?;
    let decoded = decode_document(&bytes)?;
    let ext = input
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    let out = split_by_error_code(&decoded.text, ext)?;
    match out.archive {
        Some(zip) => {
            std::fs::write(output_zip, zip)
                .with_context(|| format!("write zip: {}", output_zip.display()))?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Split an XLIFF/MQXLIFF file into a ZIP with one document per QA error code.
///
/// Returns 0 when an archive was written, 1 when no unit carries an error code (nothing is
/// written), other values on failure.
#[no_mangle]
pub extern "C" fn bt_split_error_codes(input_xliff: *const c_char, output_zip: *const c_char) -> i32 {
    let paths = match take_paths(&[(input_xliff, "input_xliff"), (output_zip, "output_zip")]) {
        Ok(v) => v,
        Err((e, code)) => {
            set_last_error(&e);
            return code;
        }
    };
    match run_split(&paths[0], &paths[1]) {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(err) => {
            set_last_error(&format!("{err:#}"));
            10
        }
    }
}

/// Returns the last error message as a UTF-8 C string pointer (or null if none).
/// The pointer is valid until the next failing call.
#[no_mangle]
pub extern "C" fn bt_last_error_utf8() -> *const c_char {
    let guard = LAST_ERROR.lock().unwrap_or_else(|e| e.into_inner());
    match guard.as_ref() {
        Some(s) => s.as_ptr(),
        None => std::ptr::null(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_arguments_are_reported() {
        let code = bt_clean_tmx(std::ptr::null(), std::ptr::null(), std::ptr::null());
        assert_eq!(code, 2);
        let msg = unsafe { CStr::from_ptr(bt_last_error_utf8()) };
        assert_eq!(msg.to_str().expect("utf8"), "config_path is null");
    }

    #[test]
    fn document_errors_surface_before_any_model_load() {
        let dir = std::env::temp_dir().join(format!("bitext-ffi-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("dir");
        let cstr = |p: &Path| CString::new(p.to_string_lossy().into_owned()).expect("cstring");
        let config = cstr(&dir.join("missing.toml"));
        let output = cstr(&dir.join("out.tmx"));

        let broken = dir.join("broken.tmx");
        std::fs::write(&broken, "<tmx><body><tu>").expect("write");
        let code = bt_clean_tmx(config.as_ptr(), cstr(&broken).as_ptr(), output.as_ptr());
        assert_eq!(code, 10);

        let empty = dir.join("empty.tmx");
        std::fs::write(&empty, "<tmx version=\"1.4\"><header/><body/></tmx>").expect("write");
        let code = bt_clean_tmx(config.as_ptr(), cstr(&empty).as_ptr(), output.as_ptr());
        assert_eq!(code, 0);
        let written = std::fs::read_to_string(dir.join("out.tmx")).expect("read");
        assert!(written.contains("<body/>"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn error_codes_follow_clean_error_kind() {
        let parse = anyhow::Error::from(CleanError::DocumentParse("x".into()));
        assert_eq!(clean_error_code(&parse), 10);
        let embed = anyhow::Error::from(CleanError::EmbeddingUnavailable("x".into()));
        assert_eq!(clean_error_code(&embed), 12);
        assert_eq!(clean_error_code(&anyhow::anyhow!("io")), 19);
    }
}
