// Validation message routing
//
// The validation layers call back into `messenger_callback`. Instead of a
// global hook, the callback receives a pointer to the `DebugSink` the caller
// injected, and that sink decides where the text goes.

use anyhow::{Context, Result};
use ash::vk;
use parking_lot::Mutex;
use std::ffi::{c_void, CStr};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Severity of a validation message, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DebugSeverity {
    Verbose,
    Info,
    Warning,
    Error,
}

impl DebugSeverity {
    pub fn from_vk(flags: vk::DebugUtilsMessageSeverityFlagsEXT) -> Self {
        if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            Self::Error
        } else if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            Self::Warning
        } else if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
            Self::Info
        } else {
            Self::Verbose
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Verbose => "VERBOSE",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DebugMessage {
    pub severity: DebugSeverity,
    pub kind: vk::DebugUtilsMessageTypeFlagsEXT,
    pub text: String,
}

impl DebugMessage {
    fn kind_label(&self) -> &'static str {
        if self.kind.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
            "validation"
        } else if self.kind.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
            "performance"
        } else {
            "general"
        }
    }
}

/// Receiver for validation messages.
pub type DebugSink = Box<dyn Fn(&DebugMessage) + Send + Sync>;

/// Forward messages to the `log` facade.
pub fn log_sink() -> DebugSink {
    Box::new(|message: &DebugMessage| match message.severity {
        DebugSeverity::Error => log::error!("[Vulkan] {}", message.text),
        DebugSeverity::Warning => log::warn!("[Vulkan] {}", message.text),
        DebugSeverity::Info => log::info!("[Vulkan] {}", message.text),
        DebugSeverity::Verbose => log::debug!("[Vulkan] {}", message.text),
    })
}

/// Same as `log_sink`, and also append every message to `path`.
///
/// The file is truncated and given a header line first.
pub fn file_sink(path: &Path) -> Result<DebugSink> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("Failed to open validation log {:?}", path))?;
    writeln!(file, "=== Vulkan validation log ===")?;

    let file: Mutex<File> = Mutex::new(file);
    let log = log_sink();
    Ok(Box::new(move |message: &DebugMessage| {
        log(message);
        let mut file = file.lock();
        let _ = writeln!(
            file,
            "[{}] {}: {}",
            message.severity.label(),
            message.kind_label(),
            message.text
        );
    }))
}

/// Severity bits to ask the messenger for.
pub fn severity_filter(verbose: bool) -> vk::DebugUtilsMessageSeverityFlagsEXT {
    let mut flags = vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    if verbose {
        flags |= vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE;
    }
    flags
}

/// Messenger create-info pointing at `sink`.
///
/// `sink` must stay at the same address until the messenger and the instance
/// it was chained into are destroyed.
pub fn messenger_create_info(
    sink: &DebugSink,
    verbose: bool,
) -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(severity_filter(verbose))
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(messenger_callback))
        .user_data(sink as *const DebugSink as *mut c_void)
}

unsafe extern "system" fn messenger_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    p_user_data: *mut c_void,
) -> vk::Bool32 {
    if p_user_data.is_null() || p_callback_data.is_null() {
        return vk::FALSE;
    }

    let p_message = (*p_callback_data).p_message;
    let text = if p_message.is_null() {
        String::new()
    } else {
        CStr::from_ptr(p_message).to_string_lossy().into_owned()
    };

    let sink = &*(p_user_data as *const DebugSink);
    sink(&DebugMessage {
        severity: DebugSeverity::from_vk(message_severity),
        kind: message_type,
        text,
    });

    vk::FALSE
}
