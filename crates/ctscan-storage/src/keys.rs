//! 本地持久化键名

pub const AUTH_TOKEN: &str = "authToken";
pub const DOCTOR_PROFILE: &str = "doctorProfile";
pub const DOCTOR_PROFILE_EXTRAS: &str = "doctorProfileExtras";
pub const SELECTED_PATIENT_ID: &str = "selectedPatientId";
pub const SELECTED_PATIENT_NAME: &str = "selectedPatientName";
pub const SELECTED_PATIENT_MEDICAL_HISTORY: &str = "selectedPatientMedicalHistory";
pub const SELECTED_PATIENT_DOCTOR_NOTES: &str = "selectedPatientDoctorNotes";
pub const REPORT_DATA: &str = "reportData";
