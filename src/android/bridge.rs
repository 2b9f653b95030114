//! JNI function exports for Android integration
//!
//! The mirroring service on the Kotlin side owns the device session. It
//! pushes decoded frames in, and drains device commands out as JSON through
//! `nextCommand`, forwarding each one over the control socket.

use std::sync::{Arc, MutexGuard, PoisonError};

use jni::objects::{JByteArray, JClass, JObject, JString};
use jni::sys::{jboolean, jint, JNI_FALSE, JNI_TRUE};
use jni::JNIEnv;
use once_cell::sync::OnceCell;

use super::{CommandQueue, Keycode, TouchAction};
use crate::config::Settings;
use crate::vision::{self, Frame, FrameBuffer};
use crate::{get_bot, init_bot, Bot};

/// Commands waiting for the host, shared with the global bot
static COMMAND_QUEUE: OnceCell<Arc<CommandQueue>> = OnceCell::new();

/// Input slot of the global bot; frames are published without the bot lock
static FRAME_BUFFER: OnceCell<Arc<FrameBuffer>> = OnceCell::new();

fn lock_bot() -> Option<MutexGuard<'static, Bot>> {
    let Some(bot) = get_bot() else {
        log::error!("Bot not initialized");
        return None;
    };
    Some(bot.lock().unwrap_or_else(PoisonError::into_inner))
}

fn new_jstring<'local>(env: &JNIEnv<'local>, value: &str) -> JString<'local> {
    match env.new_string(value) {
        Ok(s) => s,
        Err(e) => {
            log::error!("Failed to create Java string: {}", e);
            JObject::null().into()
        }
    }
}

fn parse_settings(env: &mut JNIEnv, config_json: &JString) -> Option<Settings> {
    if config_json.is_null() {
        return Some(Settings::default());
    }

    let config: String = match env.get_string(config_json) {
        Ok(s) => s.into(),
        Err(e) => {
            log::error!("Failed to get config string: {}", e);
            return None;
        }
    };

    match Settings::from_json(&config) {
        Ok(settings) => Some(settings),
        Err(e) => {
            log::error!("Rejected settings: {}", e);
            None
        }
    }
}

/// Decode RGBA or packed BGR pixels, picked by buffer length
fn decode_frame(bytes: Vec<u8>, width: u32, height: u32) -> Option<Frame> {
    let pixels = width as usize * height as usize;
    let frame = if bytes.len() == pixels * 4 {
        Frame::from_rgba(width, height, &bytes)
    } else {
        Frame::from_bgr(width, height, bytes)
    };

    match frame {
        Ok(frame) => Some(frame),
        Err(e) => {
            log::warn!("Dropping frame {}x{}: {}", width, height, e);
            None
        }
    }
}

/// Decode a pushed frame into the bot's input slot
fn publish_frame(buffer: &FrameBuffer, bytes: Vec<u8>, width: u32, height: u32) -> bool {
    match decode_frame(bytes, width, height) {
        Some(frame) => {
            buffer.publish(frame);
            true
        }
        None => false,
    }
}

/// Initialize the automation core
///
/// Called once when the mirroring service starts. Returns false if the
/// settings are rejected or a core already exists.
#[no_mangle]
pub extern "system" fn Java_io_autobattle_AutoBattleCore_init<'local>(
    mut env: JNIEnv<'local>,
    _class: JClass<'local>,
    config_json: JString<'local>,
) -> jboolean {
    #[cfg(target_os = "android")]
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Debug)
            .with_tag("AutoBattle"),
    );

    log::info!("Initializing automation core");

    let Some(settings) = parse_settings(&mut env, &config_json) else {
        return JNI_FALSE;
    };

    let queue = COMMAND_QUEUE.get_or_init(|| Arc::new(CommandQueue::new()));
    let bot = Bot::new(settings, queue.clone());
    let buffer = bot.frame_buffer().clone();
    if !init_bot(bot) {
        log::warn!("Automation core already initialized");
        return JNI_FALSE;
    }
    let _ = FRAME_BUFFER.set(buffer);

    log::info!("Automation core initialized");
    JNI_TRUE
}

/// Report the device's native resolution for pointer scaling
#[no_mangle]
pub extern "system" fn Java_io_autobattle_AutoBattleCore_setDeviceSize<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
    width: jint,
    height: jint,
) {
    if let Some(mut bot) = lock_bot() {
        bot.set_native_resolution(width.max(0) as u32, height.max(0) as u32);
    }
}

/// Start the automation loops
#[no_mangle]
pub extern "system" fn Java_io_autobattle_AutoBattleCore_start<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
) -> jboolean {
    let Some(mut bot) = lock_bot() else {
        return JNI_FALSE;
    };

    match bot.start() {
        Ok(()) => JNI_TRUE,
        Err(e) => {
            log::error!("Failed to start automation loops: {}", e);
            JNI_FALSE
        }
    }
}

/// Hand a decoded frame to the core without waiting on other JNI calls
#[no_mangle]
pub extern "system" fn Java_io_autobattle_AutoBattleCore_pushFrame<'local>(
    env: JNIEnv<'local>,
    _class: JClass<'local>,
    frame_data: JByteArray<'local>,
    width: jint,
    height: jint,
) {
    if width <= 0 || height <= 0 {
        log::warn!("Ignoring frame with size {}x{}", width, height);
        return;
    }

    let Some(buffer) = FRAME_BUFFER.get() else {
        log::error!("Bot not initialized");
        return;
    };

    let bytes = match env.convert_byte_array(frame_data) {
        Ok(bytes) => bytes,
        Err(e) => {
            log::error!("Failed to convert frame data: {}", e);
            return;
        }
    };

    publish_frame(buffer, bytes, width as u32, height as u32);
}

/// Next device command as JSON, or null when none is waiting
#[no_mangle]
pub extern "system" fn Java_io_autobattle_AutoBattleCore_nextCommand<'local>(
    env: JNIEnv<'local>,
    _class: JClass<'local>,
) -> JString<'local> {
    let Some(command) = COMMAND_QUEUE.get().and_then(|queue| queue.pop()) else {
        return JObject::null().into();
    };

    match serde_json::to_string(&command) {
        Ok(json) => new_jstring(&env, &json),
        Err(e) => {
            log::error!("Failed to encode command: {}", e);
            JObject::null().into()
        }
    }
}

/// Pause/resume automation
#[no_mangle]
pub extern "system" fn Java_io_autobattle_AutoBattleCore_setPaused<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
    paused: jboolean,
) {
    if let Some(bot) = lock_bot() {
        bot.set_stopped(paused != 0);
        log::info!("Automation {}", if paused != 0 { "paused" } else { "resumed" });
    }
}

#[no_mangle]
pub extern "system" fn Java_io_autobattle_AutoBattleCore_isPaused<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
) -> jboolean {
    match lock_bot() {
        Some(bot) if bot.is_stopped() => JNI_TRUE,
        _ => JNI_FALSE,
    }
}

/// Get the current battle flags as JSON
#[no_mangle]
pub extern "system" fn Java_io_autobattle_AutoBattleCore_getBattleState<'local>(
    env: JNIEnv<'local>,
    _class: JClass<'local>,
) -> JString<'local> {
    let Some(bot) = lock_bot() else {
        return new_jstring(&env, "{}");
    };

    let json = serde_json::to_string(&bot.snapshot()).unwrap_or_else(|_| "{}".to_string());
    new_jstring(&env, &json)
}

/// Save the current frame; returns the file path or null
#[no_mangle]
pub extern "system" fn Java_io_autobattle_AutoBattleCore_captureScreenshot<'local>(
    env: JNIEnv<'local>,
    _class: JClass<'local>,
) -> JString<'local> {
    let target = match lock_bot() {
        Some(bot) => bot.screenshot_target(),
        None => return JObject::null().into(),
    };

    // PNG encoding happens after the bot lock is released
    match target.and_then(|(frame, dir)| vision::save_screenshot(&frame, &dir)) {
        Ok(path) => new_jstring(&env, &path.to_string_lossy()),
        Err(e) => {
            log::warn!("Screenshot failed: {}", e);
            JObject::null().into()
        }
    }
}

/// Forward an operator pointer event given in display coordinates
#[no_mangle]
pub extern "system" fn Java_io_autobattle_AutoBattleCore_forwardTouch<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
    x: f32,
    y: f32,
    action: jint,
) -> jboolean {
    let Some(action) = TouchAction::from_code(action) else {
        log::warn!("Unknown touch action {}", action);
        return JNI_FALSE;
    };
    let Some(bot) = lock_bot() else {
        return JNI_FALSE;
    };

    match bot.forward_pointer(x, y, action) {
        Ok(()) => JNI_TRUE,
        Err(e) => {
            log::error!("Failed to forward touch: {}", e);
            JNI_FALSE
        }
    }
}

/// Forward an Android key code (down then up)
#[no_mangle]
pub extern "system" fn Java_io_autobattle_AutoBattleCore_pressKey<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
    code: jint,
) -> jboolean {
    let Some(bot) = lock_bot() else {
        return JNI_FALSE;
    };

    let result = match Keycode(code) {
        Keycode::HOME => bot.home(),
        Keycode::BACK => bot.back(),
        key => bot.press_key(key),
    };
    match result {
        Ok(()) => JNI_TRUE,
        Err(e) => {
            log::error!("Failed to press key {}: {}", code, e);
            JNI_FALSE
        }
    }
}

/// Stop every loop and close the command queue
#[no_mangle]
pub extern "system" fn Java_io_autobattle_AutoBattleCore_shutdown<'local>(
    _env: JNIEnv<'local>,
    _class: JClass<'local>,
) {
    if let Some(mut bot) = lock_bot() {
        bot.shutdown();
    }
    if let Some(queue) = COMMAND_QUEUE.get() {
        queue.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rgba_frame() {
        let rgba = vec![10, 20, 30, 255, 40, 50, 60, 255];
        let frame = decode_frame(rgba, 2, 1).unwrap();
        assert_eq!(frame.pixel(0, 0), [30, 20, 10]);
        assert_eq!(frame.pixel(1, 0), [60, 50, 40]);
    }

    #[test]
    fn test_decode_bgr_frame() {
        let bgr = vec![1, 2, 3, 4, 5, 6];
        let frame = decode_frame(bgr, 2, 1).unwrap();
        assert_eq!(frame.pixel(1, 0), [4, 5, 6]);
    }

    #[test]
    fn test_decode_rejects_short_buffer() {
        assert!(decode_frame(vec![0; 5], 2, 1).is_none());
    }

    #[test]
    fn test_publish_while_bot_locked() {
        use crate::automation::ManualClock;
        use crate::vision::TemplateDir;
        use std::sync::Mutex;

        let settings = Settings::default();
        let templates = Arc::new(TemplateDir::new(settings.template_dir.clone()));
        let bot = Bot::with_parts(
            settings,
            Arc::new(CommandQueue::new()),
            templates,
            Arc::new(ManualClock::new()),
        );
        let buffer = bot.frame_buffer().clone();
        let bot = Mutex::new(bot);

        let _guard = bot.lock().unwrap();
        assert!(publish_frame(&buffer, vec![0; 2 * 2 * 4], 2, 2));
        assert!(!publish_frame(&buffer, vec![0; 3], 2, 2));
        assert_eq!(buffer.published(), 1);

        let frame = buffer.try_take().unwrap();
        assert_eq!((frame.width(), frame.height()), (2, 2));
    }
}
