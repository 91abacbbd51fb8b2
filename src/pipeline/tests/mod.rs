mod msg;
