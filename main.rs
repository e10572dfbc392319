// Prevents additional console window on Windows in release, DO NOT REMOVE!!
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use tauri::Manager;
use tauri_vision::error::RecognitionError;
use tauri_vision::models::{CameraFrame, RecognitionResult};
use tauri_vision::{onnx, RecognitionService, RecognizerConfig};

pub struct AppState {
    recognition: RecognitionService,
}

#[tauri::command]
async fn init_model(state: tauri::State<'_, AppState>) -> Result<String, RecognitionError> {
    state.recognition.initialize().await?;
    Ok("Model initialized successfully".to_string())
}

#[tauri::command]
async fn recognize_image(
    image_path: String,
    state: tauri::State<'_, AppState>,
) -> Result<Vec<RecognitionResult>, RecognitionError> {
    state.recognition.recognize_by_reference(&image_path).await
}

#[tauri::command]
async fn recognize_image_data(
    image_data: String,
    state: tauri::State<'_, AppState>,
) -> Result<Vec<RecognitionResult>, RecognitionError> {
    state.recognition.recognize_data(image_data).await
}

#[tauri::command]
async fn recognize_camera_frame(
    frame: CameraFrame,
    state: tauri::State<'_, AppState>,
) -> Result<Vec<RecognitionResult>, RecognitionError> {
    state.recognition.recognize_frame(frame).await
}

/// Content URIs are a mobile gallery concept; desktop file pickers hand us
/// plain paths instead.
#[tauri::command]
async fn read_content_uri(uri: String) -> Result<String, String> {
    log::warn!("Content URI requested on a platform without a resolver: {uri}");
    Err("Content URI handling is only supported on Android".to_string())
}

fn main() {
    env_logger::init();

    tauri::Builder::default()
        .setup(|app| {
            let resource_dir = app.path_resolver().resource_dir();
            if let Err(err) = onnx::configure_runtime_dir(resource_dir.as_deref()) {
                log::warn!("{err}");
            }
            let config = RecognizerConfig::from_env().resolve_assets(resource_dir.as_deref());
            let recognition = RecognitionService::new(config)?;
            app.manage(AppState { recognition });
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            init_model,
            recognize_image,
            recognize_image_data,
            recognize_camera_frame,
            read_content_uri
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
