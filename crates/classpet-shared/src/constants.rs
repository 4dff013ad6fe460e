/// Application name
pub const APP_NAME: &str = "ClassPet";

/// Length of the human-typed class code
pub const CLASS_CODE_LEN: usize = 6;

/// Alphabet for generated class codes (no 0/O or 1/I look-alikes)
pub const CLASS_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of a student PIN
pub const PIN_LEN: usize = 4;

/// Highest student number that still maps onto a 4-digit default PIN
pub const MAX_STUDENT_NUMBER: u32 = 9999;

/// Exp consumed per pet level
pub const EXP_PER_LEVEL: u32 = 100;

/// Final pet level; reaching it completes the pet
pub const MAX_PET_LEVEL: u32 = 5;

/// Default exp granted to a student for an emotion check-in
pub const DEFAULT_EMOTION_CHECKIN_EXP: u32 = 10;

/// Root collection that maps class codes to their scope
pub const CLASS_CODE_REGISTRY: &str = "classCodes";

/// Toast shown when a write is deferred to the offline queue
pub const WRITE_DEFERRED_MESSAGE: &str = "저장에 실패했어요. 나중에 다시 시도합니다";

/// Local cache keys
pub mod keys {
    pub const SETTINGS: &str = "settings";
    pub const STUDENTS: &str = "students";
    pub const PETS: &str = "pets";
    pub const PRAISE_LOG: &str = "praiseLog";
    pub const EMOTION_LOG: &str = "emotionLog";
    pub const NOTICES: &str = "notices";
    pub const NOTIFICATIONS: &str = "notifications";
    pub const OFFLINE_QUEUE: &str = "offlineQueue";
    pub const TOMBSTONES: &str = "tombstones";
    pub const CURRENT_CLASS_ID: &str = "currentClassId";
    pub const CURRENT_TEACHER_UID: &str = "currentTeacherUid";
}
