//! Win32 implementations of the platform seams.

use std::ffi::{c_void, OsStr};
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use libloading::Library;
use tracing::{debug, warn};
use windows_sys::core::BOOL;
use windows_sys::Win32::Foundation::{
    GetLastError, ERROR_FILE_NOT_FOUND, ERROR_SUCCESS, HWND, LPARAM,
};
use windows_sys::Win32::System::Diagnostics::Debug::{
    SetErrorMode, SEM_FAILCRITICALERRORS, SEM_NOGPFAULTERRORBOX,
};
use windows_sys::Win32::System::Registry::{
    RegCloseKey, RegCreateKeyExW, RegGetValueW, RegSetValueExW, HKEY, HKEY_CURRENT_USER,
    KEY_WRITE, REG_DWORD, REG_MULTI_SZ, REG_OPTION_NON_VOLATILE, REG_SZ, RRF_RT_REG_SZ,
};
use windows_sys::Win32::UI::WindowsAndMessaging::{
    EnumWindows, GetClassNameW, GetWindow, GetWindowThreadProcessId, IsWindowVisible,
    PostMessageW, SendMessageTimeoutW, SystemParametersInfoW, GW_OWNER, HWND_BROADCAST,
    SMTO_ABORTIFHUNG, SPIF_SENDCHANGE, SPIF_UPDATEINIFILE, SPI_SETDESKWALLPAPER, WM_CLOSE,
    WM_SETTINGCHANGE, WM_THEMECHANGED,
};

use super::{
    Broadcast, ErrorModeControl, NativeStatus, SettingValue, SettingsStore, ShellWindow,
    ThemeEngine,
};

/// HRESULT_FROM_WIN32(ERROR_PROC_NOT_FOUND)
const STATUS_PROC_NOT_FOUND: NativeStatus = 0x8007_007F;

const SIGNATURE_FIX_SYMBOL: &[u8] = b"themetool_signature_fix\0";
const INIT_SYMBOL: &[u8] = b"ThemeTool_Init\0";
const SET_ACTIVE_SYMBOL: &[u8] = b"ThemeTool_SetActive\0";

type StatusFn = unsafe extern "system" fn() -> i32;
type PathStatusFn = unsafe extern "system" fn(*const u16) -> i32;

fn to_wide(s: &OsStr) -> Vec<u16> {
    s.encode_wide().chain(std::iter::once(0)).collect()
}

fn to_wide_str(s: &str) -> Vec<u16> {
    to_wide(OsStr::new(s))
}

// ============================================================================
// Native theming library
// ============================================================================

/// Entry points exported by the native theming helper DLL
pub struct NativeThemeEngine {
    library: Library,
}

impl NativeThemeEngine {
    pub fn load(path: &str) -> Result<Self> {
        // Safety: the helper DLL has no initialisation side effects in DllMain.
        let library = unsafe { Library::new(path) }?;
        debug!(path, "Native theming library loaded");
        Ok(Self { library })
    }

    fn call_with_path(&self, symbol: &[u8], theme: &Path) -> NativeStatus {
        let wide = to_wide(theme.as_os_str());
        // Safety: exported as HRESULT WINAPI fn(LPCWSTR); `wide` is NUL-terminated.
        unsafe {
            match self.library.get::<PathStatusFn>(symbol) {
                Ok(entry) => entry(wide.as_ptr()) as u32,
                Err(e) => {
                    warn!(error = %e, "Native entry point missing");
                    STATUS_PROC_NOT_FOUND
                }
            }
        }
    }
}

impl ThemeEngine for NativeThemeEngine {
    fn signature_fix(&self, theme: &Path) -> NativeStatus {
        self.call_with_path(SIGNATURE_FIX_SYMBOL, theme)
    }

    fn init(&self) -> NativeStatus {
        // Safety: exported as HRESULT WINAPI fn(void).
        unsafe {
            match self.library.get::<StatusFn>(INIT_SYMBOL) {
                Ok(entry) => entry() as u32,
                Err(e) => {
                    warn!(error = %e, "Native entry point missing");
                    STATUS_PROC_NOT_FOUND
                }
            }
        }
    }

    fn set_active(&self, theme: &Path) -> NativeStatus {
        self.call_with_path(SET_ACTIVE_SYMBOL, theme)
    }

    fn broadcast(&self, notification: Broadcast, timeout: Duration) -> Result<()> {
        let policy = to_wide_str("Policy");
        let (message, lparam) = match notification {
            Broadcast::PolicySettingChange => (WM_SETTINGCHANGE, policy.as_ptr() as LPARAM),
            Broadcast::ThemeChanged => (WM_THEMECHANGED, 0),
        };
        let mut result: usize = 0;
        let timeout_ms = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);
        // Safety: `policy` outlives the call; HWND_BROADCAST is a valid target.
        let sent = unsafe {
            SendMessageTimeoutW(
                HWND_BROADCAST,
                message,
                0,
                lparam,
                SMTO_ABORTIFHUNG,
                timeout_ms,
                &mut result,
            )
        };
        if sent == 0 {
            let err = unsafe { GetLastError() };
            bail!("{:?} broadcast failed (error {})", notification, err);
        }
        Ok(())
    }

    fn set_wallpaper(&self, image: &Path) -> Result<()> {
        let mut wide = to_wide(image.as_os_str());
        // Safety: SPI_SETDESKWALLPAPER reads a NUL-terminated wide path.
        let ok = unsafe {
            SystemParametersInfoW(
                SPI_SETDESKWALLPAPER,
                0,
                wide.as_mut_ptr() as *mut c_void,
                SPIF_UPDATEINIFILE | SPIF_SENDCHANGE,
            )
        };
        if ok == 0 {
            let err = unsafe { GetLastError() };
            bail!("SystemParametersInfo failed for {} (error {})", image.display(), err);
        }
        Ok(())
    }
}

// ============================================================================
// Registry
// ============================================================================

/// `HKEY_CURRENT_USER` backed settings
#[derive(Debug, Default)]
pub struct RegistryStore;

struct OpenKey(HKEY);

impl Drop for OpenKey {
    fn drop(&mut self) {
        unsafe {
            RegCloseKey(self.0);
        }
    }
}

fn create_key(key: &str) -> Result<OpenKey> {
    let subkey = to_wide_str(key);
    let mut handle: HKEY = std::ptr::null_mut();
    // Safety: all out-pointers are valid for the duration of the call.
    let status = unsafe {
        RegCreateKeyExW(
            HKEY_CURRENT_USER,
            subkey.as_ptr(),
            0,
            std::ptr::null(),
            REG_OPTION_NON_VOLATILE,
            KEY_WRITE,
            std::ptr::null(),
            &mut handle,
            std::ptr::null_mut(),
        )
    };
    if status != ERROR_SUCCESS {
        bail!("RegCreateKeyEx(HKCU\\{}) failed with error {}", key, status);
    }
    Ok(OpenKey(handle))
}

/// REG_MULTI_SZ layout: each string NUL-terminated, then a final NUL
fn encode_multi_string(items: &[String]) -> Vec<u16> {
    let mut data: Vec<u16> = Vec::new();
    for item in items {
        data.extend(item.encode_utf16());
        data.push(0);
    }
    data.push(0);
    data
}

impl SettingsStore for RegistryStore {
    fn write(&self, key: &str, name: &str, value: SettingValue) -> Result<()> {
        let open = create_key(key)?;
        let value_name = to_wide_str(name);

        let (kind, bytes): (u32, Vec<u8>) = match &value {
            SettingValue::String(s) => (
                REG_SZ,
                to_wide_str(s).iter().flat_map(|u| u.to_le_bytes()).collect(),
            ),
            SettingValue::Dword(d) => (REG_DWORD, d.to_le_bytes().to_vec()),
            SettingValue::MultiString(items) => (
                REG_MULTI_SZ,
                encode_multi_string(items)
                    .iter()
                    .flat_map(|u| u.to_le_bytes())
                    .collect(),
            ),
        };

        // Safety: `bytes` holds exactly `bytes.len()` bytes of the declared type.
        let status = unsafe {
            RegSetValueExW(
                open.0,
                value_name.as_ptr(),
                0,
                kind,
                bytes.as_ptr(),
                bytes.len() as u32,
            )
        };
        if status != ERROR_SUCCESS {
            bail!("RegSetValueEx({}\\{}) failed with error {}", key, name, status);
        }
        Ok(())
    }

    fn read_string(&self, key: &str, name: &str) -> Result<Option<String>> {
        let subkey = to_wide_str(key);
        let value_name = to_wide_str(name);
        let mut size: u32 = 0;

        // First call sizes the buffer.
        let status = unsafe {
            RegGetValueW(
                HKEY_CURRENT_USER,
                subkey.as_ptr(),
                value_name.as_ptr(),
                RRF_RT_REG_SZ,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                &mut size,
            )
        };
        if status == ERROR_FILE_NOT_FOUND {
            return Ok(None);
        }
        if status != ERROR_SUCCESS {
            bail!("RegGetValue({}\\{}) failed with error {}", key, name, status);
        }

        let mut buffer: Vec<u16> = vec![0; (size as usize).div_ceil(2)];
        let status = unsafe {
            RegGetValueW(
                HKEY_CURRENT_USER,
                subkey.as_ptr(),
                value_name.as_ptr(),
                RRF_RT_REG_SZ,
                std::ptr::null_mut(),
                buffer.as_mut_ptr() as *mut c_void,
                &mut size,
            )
        };
        if status != ERROR_SUCCESS {
            bail!("RegGetValue({}\\{}) failed with error {}", key, name, status);
        }

        let len = buffer.iter().position(|&u| u == 0).unwrap_or(buffer.len());
        Ok(Some(String::from_utf16_lossy(&buffer[..len])))
    }
}

// ============================================================================
// Error mode
// ============================================================================

/// Process-wide error mode. Process-wide rather than per-thread so a deferred
/// restore from a background thread applies to the same state it captured.
#[derive(Debug, Default)]
pub struct ProcessErrorMode;

impl ErrorModeControl for ProcessErrorMode {
    fn suppress(&self) -> Result<u32> {
        // Safety: SetErrorMode has no pointer arguments.
        let previous = unsafe { SetErrorMode(SEM_FAILCRITICALERRORS | SEM_NOGPFAULTERRORBOX) };
        Ok(previous)
    }

    fn restore(&self, previous: u32) -> Result<()> {
        unsafe {
            SetErrorMode(previous);
        }
        Ok(())
    }
}

// ============================================================================
// Windows
// ============================================================================

unsafe extern "system" fn collect_window(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let handles = &mut *(lparam as *mut Vec<HWND>);
    handles.push(hwnd);
    1
}

fn class_name(hwnd: HWND) -> String {
    let mut buffer = [0u16; 256];
    let len = unsafe { GetClassNameW(hwnd, buffer.as_mut_ptr(), buffer.len() as i32) };
    String::from_utf16_lossy(&buffer[..len.max(0) as usize])
}

/// Visible, unowned top-level windows of the given processes
pub fn top_level_windows(pids: &[u32]) -> Vec<ShellWindow> {
    let mut handles: Vec<HWND> = Vec::new();
    // Safety: the callback only pushes into `handles`, which outlives EnumWindows.
    unsafe {
        EnumWindows(Some(collect_window), &mut handles as *mut Vec<HWND> as LPARAM);
    }

    handles
        .into_iter()
        .filter_map(|hwnd| {
            let mut pid: u32 = 0;
            unsafe {
                GetWindowThreadProcessId(hwnd, &mut pid);
            }
            if !pids.contains(&pid) {
                return None;
            }
            let visible = unsafe { IsWindowVisible(hwnd) } != 0;
            let owned = !unsafe { GetWindow(hwnd, GW_OWNER) }.is_null();
            if !visible || owned {
                return None;
            }
            Some(ShellWindow {
                handle: hwnd as isize,
                pid,
                class_name: class_name(hwnd),
            })
        })
        .collect()
}

pub fn post_close(handle: isize) -> Result<()> {
    // Safety: posting to a stale handle fails cleanly.
    let ok = unsafe { PostMessageW(handle as HWND, WM_CLOSE, 0, 0) };
    if ok == 0 {
        let err = unsafe { GetLastError() };
        return Err(anyhow::anyhow!("PostMessage(WM_CLOSE) failed (error {})", err))
            .context(format!("Closing window {:#x}", handle));
    }
    Ok(())
}
